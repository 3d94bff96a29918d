// Property-based tests for the range planner
//
// Properties tested:
// 1. Coverage: every distinct input record lands in exactly one plan
// 2. Containment: each member of a range plan lies inside its window
// 3. Separation: range windows of one file are disjoint and further apart than the threshold
// 4. Decision rule: Full exactly when coverage > ratio or windows > cap
// 5. Numbering: plan ids are 0..n in order
// 6. Idempotence: merging the members of one window, or of two neighbouring
//    windows, gives those windows back unchanged

use std::collections::{HashMap, HashSet};

use ccfetch_core::{FetchMode, FileSizes, PlannerConfig, RangePlanner, Record};
use proptest::prelude::*;

fn arb_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(
        (0usize..3, 0u64..200_000, 1u64..5_000),
        1..40,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (file, offset, length))| {
                Record::new(
                    format!("crawl-data/seg-{file}.warc.gz"),
                    offset,
                    length,
                    format!("https://example.com/{i}"),
                )
            })
            .collect()
    })
}

fn arb_config() -> impl Strategy<Value = PlannerConfig> {
    (0u64..20_000, 0.05f64..0.95, 1usize..25).prop_map(|(threshold, ratio, cap)| PlannerConfig {
        merge_threshold_bytes: threshold,
        full_download_ratio: ratio,
        max_ranges_per_file: cap,
    })
}

fn arb_sizes() -> impl Strategy<Value = FileSizes> {
    prop::collection::vec(prop::option::of(205_000u64..2_000_000), 3).prop_map(|sizes| {
        sizes
            .into_iter()
            .enumerate()
            .filter_map(|(file, size)| size.map(|s| (format!("crawl-data/seg-{file}.warc.gz"), s)))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_every_record_planned_once(
        records in arb_records(),
        config in arb_config(),
        sizes in arb_sizes(),
    ) {
        let planner = RangePlanner::new(config).unwrap();
        let plan = planner.plan(records.clone(), &sizes).unwrap();

        let distinct: HashSet<Record> = records.into_iter().collect();
        let mut seen: HashMap<Record, usize> = HashMap::new();
        for fetch in plan.plans() {
            prop_assert_eq!(fetch.members.len(), fetch.expected_record_count as usize);
            for member in &fetch.members {
                *seen.entry(member.clone()).or_default() += 1;
            }
        }

        prop_assert_eq!(seen.len(), distinct.len());
        for record in &distinct {
            prop_assert_eq!(seen.get(record).copied(), Some(1));
        }
    }

    #[test]
    fn prop_range_members_inside_window(
        records in arb_records(),
        config in arb_config(),
        sizes in arb_sizes(),
    ) {
        let planner = RangePlanner::new(config).unwrap();
        let plan = planner.plan(records, &sizes).unwrap();

        for fetch in plan.plans().iter().filter(|p| p.mode == FetchMode::Range) {
            let range = fetch.byte_range().unwrap();
            for member in &fetch.members {
                prop_assert!(member.offset >= range.start);
                prop_assert!(member.end() - 1 <= range.end);
                prop_assert_eq!(&member.archive_file, &fetch.archive_file);
            }
        }
    }

    #[test]
    fn prop_windows_disjoint_and_separated(
        records in arb_records(),
        config in arb_config(),
    ) {
        let threshold = config.merge_threshold_bytes;
        let planner = RangePlanner::new(config).unwrap();
        let plan = planner.plan(records, &FileSizes::new()).unwrap();

        for decision in plan.decisions() {
            for pair in decision.merged_ranges.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
                prop_assert!(pair[1].start - pair[0].end > threshold);
            }
        }
    }

    #[test]
    fn prop_full_decision_rule(
        records in arb_records(),
        config in arb_config(),
        sizes in arb_sizes(),
    ) {
        let ratio = config.full_download_ratio;
        let cap = config.max_ranges_per_file;
        let planner = RangePlanner::new(config).unwrap();
        let plan = planner.plan(records, &sizes).unwrap();

        for decision in plan.decisions() {
            let coverage = decision.total_merged_bytes as f64 / decision.file_size as f64;
            let expect_full = coverage > ratio || decision.merged_ranges.len() > cap;
            prop_assert_eq!(decision.mode == FetchMode::Full, expect_full);

            let file_plans: Vec<_> = plan
                .plans()
                .iter()
                .filter(|p| p.archive_file == decision.archive_file)
                .collect();
            if expect_full {
                prop_assert_eq!(file_plans.len(), 1);
                prop_assert!(file_plans[0].byte_range().is_none());
            } else {
                prop_assert_eq!(file_plans.len(), decision.merged_ranges.len());
            }
        }
    }

    #[test]
    fn prop_plan_ids_sequential(
        records in arb_records(),
        config in arb_config(),
    ) {
        let planner = RangePlanner::new(config).unwrap();
        let plan = planner.plan(records, &FileSizes::new()).unwrap();

        for (index, fetch) in plan.plans().iter().enumerate() {
            prop_assert_eq!(fetch.plan_id as usize, index);
        }
    }
}

#[test]
fn test_empty_record_set_plans_nothing() {
    let planner = RangePlanner::new(PlannerConfig::default()).unwrap();
    let plan = planner.plan(Vec::new(), &FileSizes::new()).unwrap();
    assert!(plan.is_empty());
    assert!(plan.decisions().is_empty());
}

#[test]
fn test_single_record_small_file_goes_full() {
    // one 1000-byte record in a 1500-byte file covers more than half of it
    let planner = RangePlanner::new(PlannerConfig::default()).unwrap();
    let mut sizes = FileSizes::new();
    sizes.insert("x.warc.gz".to_string(), 1_500);

    let plan = planner
        .plan(vec![Record::new("x.warc.gz", 200, 1_000, "u")], &sizes)
        .unwrap();
    assert_eq!(plan.plans()[0].mode, FetchMode::Full);
}

proptest! {
    #[test]
    fn prop_merge_idempotent(
        records in arb_records(),
        config in arb_config(),
    ) {
        let planner = RangePlanner::new(config).unwrap();
        let file_records: Vec<Record> = records
            .into_iter()
            .filter(|r| r.archive_file == "crawl-data/seg-0.warc.gz")
            .collect();
        let merged = planner.merge_ranges(&file_records);

        for range in &merged {
            prop_assert_eq!(planner.merge_ranges(&range.members), vec![range.clone()]);
        }

        for pair in merged.windows(2) {
            let members: Vec<Record> = pair
                .iter()
                .flat_map(|range| range.members.iter().cloned())
                .collect();
            prop_assert_eq!(planner.merge_ranges(&members), pair.to_vec());
        }
    }
}
