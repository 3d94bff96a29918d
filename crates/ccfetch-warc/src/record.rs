//! WARC record reader.
//!
//! Thin layer over the `warc` crate that keeps only the fields extraction
//! needs and stops a reader at its first parse error. Uncompressed buffers are
//! split per record first, so one bad record does not hide the rest.

use std::io::Cursor;

use bytes::Bytes;
use ccfetch_core::{CoreError, CoreResult};
use warc::{WarcHeader, WarcReader};

/// One parsed WARC record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcEntry {
    /// `WARC-Type`, e.g. `response`, `request`, `warcinfo`.
    pub warc_type: String,
    /// `WARC-Target-URI`.
    pub target_uri: Option<String>,
    /// `WARC-Record-ID`.
    pub record_id: Option<String>,
    /// `WARC-Date`.
    pub date: Option<String>,
    /// Record block (for responses: HTTP head plus payload).
    pub block: Bytes,
}

impl WarcEntry {
    pub fn is_response(&self) -> bool {
        self.warc_type.eq_ignore_ascii_case("response")
    }
}

/// Iterator over the records of an uncompressed WARC buffer.
///
/// After the first malformed record the reader position is unknown, so the
/// iterator yields that error and then ends.
pub struct WarcEntries {
    records: Box<dyn Iterator<Item = CoreResult<WarcEntry>>>,
    failed: bool,
}

impl WarcEntries {
    pub fn new(data: Bytes) -> Self {
        let records = WarcReader::new(Cursor::new(data))
            .iter_records()
            .map(|result| {
                let record = result.map_err(|e| {
                    CoreError::MalformedContainer(format!("invalid WARC record: {e}"))
                })?;
                let header = |name: WarcHeader| record.header(name).map(|v| v.trim().to_string());

                Ok(WarcEntry {
                    warc_type: header(WarcHeader::WarcType).unwrap_or_default(),
                    target_uri: header(WarcHeader::TargetURI),
                    record_id: header(WarcHeader::RecordID),
                    date: header(WarcHeader::Date),
                    block: Bytes::copy_from_slice(record.body()),
                })
            });

        Self {
            records: Box::new(records),
            failed: false,
        }
    }
}

impl Iterator for WarcEntries {
    type Item = CoreResult<WarcEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let item = self.records.next()?;
        self.failed = item.is_err();
        Some(item)
    }
}

const RECORD_START: &[u8] = b"WARC/1.";

/// Splits an uncompressed WARC buffer into one slice per record.
///
/// A record ends after the `Content-Length` its header declares. When the
/// header is unreadable the slice runs to the next `WARC/1.` line, so a
/// corrupt record costs only itself. Slices are not validated here.
pub struct PlainRecords {
    data: Bytes,
    pos: usize,
}

impl PlainRecords {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// End of the record starting at `start`, from its declared length.
    fn declared_end(&self, start: usize) -> Option<usize> {
        let rest = &self.data[start..];
        if !rest.starts_with(RECORD_START) {
            return None;
        }
        let head_len = find(rest, b"\r\n\r\n")? + 4;
        let length = std::str::from_utf8(&rest[..head_len])
            .ok()?
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())?;
        let end = start.checked_add(head_len)?.checked_add(length)?;
        (end <= self.data.len()).then_some(end)
    }

    /// First record start at or after `from`.
    fn next_start(&self, from: usize) -> usize {
        let mut at = from;
        while let Some(found) = self.data.get(at..).and_then(|rest| find(rest, RECORD_START)) {
            let candidate = at + found;
            if candidate == 0 || self.data[candidate - 1] == b'\n' {
                return candidate;
            }
            at = candidate + 1;
        }
        self.data.len()
    }
}

impl Iterator for PlainRecords {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let search_from = self.declared_end(start).unwrap_or(start + 1);
        let end = self.next_start(search_from);
        self.pos = end;
        Some(self.data.slice(start..end))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warc_record(warc_type: &str, uri: &str, block: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "WARC/1.0\r\n\
             WARC-Type: {warc_type}\r\n\
             WARC-Date: 2024-05-22T10:10:10Z\r\n\
             WARC-Record-ID: <urn:uuid:3f0b6a2e-8c1d-4c55-9a57-1b2c3d4e5f60>\r\n\
             WARC-Target-URI: {uri}\r\n\
             Content-Type: application/http; msgtype=response\r\n\
             Content-Length: {}\r\n\
             \r\n",
            block.len()
        )
        .into_bytes();
        out.extend_from_slice(block);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    #[test]
    fn test_reads_consecutive_records() {
        let mut data = warc_record("request", "https://example.com/", b"GET / HTTP/1.1\r\n\r\n");
        data.extend(warc_record(
            "response",
            "https://example.com/",
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html></html>",
        ));

        let entries: Vec<WarcEntry> = WarcEntries::new(Bytes::from(data))
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_response());
        assert!(entries[1].is_response());
        assert_eq!(entries[1].target_uri.as_deref(), Some("https://example.com/"));
        assert_eq!(entries[1].date.as_deref(), Some("2024-05-22T10:10:10Z"));
        assert!(entries[1].record_id.is_some());
        assert!(entries[1].block.ends_with(b"<html></html>"));
    }

    #[test]
    fn test_garbage_yields_single_error() {
        let results: Vec<_> =
            WarcEntries::new(Bytes::from_static(b"this is not a warc file\r\n\r\n")).collect();
        assert!(results.len() <= 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(CoreError::MalformedContainer(_)))));
    }

    #[test]
    fn test_plain_records_split_at_declared_lengths() {
        let first = warc_record("response", "https://a/", b"HTTP/1.1 200 OK\r\n\r\nWARC/1.0 in a body");
        let second = warc_record("response", "https://b/", b"HTTP/1.1 200 OK\r\n\r\n");
        let data = Bytes::from([first.clone(), second.clone()].concat());

        let slices: Vec<Bytes> = PlainRecords::new(data).collect();
        assert_eq!(slices, vec![Bytes::from(first), Bytes::from(second)]);
    }

    #[test]
    fn test_plain_records_resync_after_bad_header() {
        let good = warc_record("response", "https://a/", b"HTTP/1.1 200 OK\r\n\r\n");
        let bad = b"WARC/1.0\r\nWARC-Type: response\r\nContent-Length: xyz\r\n\r\njunk\r\n\r\n".to_vec();
        let data = Bytes::from([b"leading garbage\n".to_vec(), bad.clone(), good.clone()].concat());

        let slices: Vec<Bytes> = PlainRecords::new(data).collect();
        assert_eq!(slices.len(), 3);
        assert_eq!(&slices[0][..], b"leading garbage\n");
        assert_eq!(slices[1], Bytes::from(bad));
        assert_eq!(slices[2], Bytes::from(good));
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert_eq!(WarcEntries::new(Bytes::new()).count(), 0);
        assert_eq!(PlainRecords::new(Bytes::new()).count(), 0);
    }
}
