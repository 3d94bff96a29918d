//! Index records: where one captured document lives inside an archive file.

use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreError, CoreResult};

/// One logical document's location inside a larger archive container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    /// Archive filename relative to the store's base location.
    pub archive_file: String,
    /// Byte offset of the (compressed) container record.
    pub offset: u64,
    /// Length in bytes of the container record.
    pub length: u64,
    /// Original URL, kept for provenance.
    pub url: String,
}

impl Record {
    pub fn new(
        archive_file: impl Into<String>,
        offset: u64,
        length: u64,
        url: impl Into<String>,
    ) -> Self {
        Self {
            archive_file: archive_file.into(),
            offset,
            length,
            url: url.into(),
        }
    }

    /// Exclusive end offset.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Checks the invariants the planner relies on.
    pub fn validate(&self) -> CoreResult<()> {
        if self.archive_file.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "record for {} has an empty archive file",
                self.url
            )));
        }
        if self.length == 0 {
            return Err(CoreError::ValidationError(format!(
                "record {}@{} has zero length",
                self.archive_file, self.offset
            )));
        }
        if self.offset.checked_add(self.length).is_none() {
            return Err(CoreError::ValidationError(format!(
                "record {}@{}+{} overflows u64",
                self.archive_file, self.offset, self.length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    filename: String,
    offset: u64,
    length: u64,
    #[serde(default)]
    url: String,
}

/// Reads records from CSV with `filename`, `offset`, `length` and an optional
/// `url` column. Other columns are ignored.
pub fn read_records_csv<R: Read>(reader: R) -> CoreResult<Vec<Record>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();

    for row in csv_reader.deserialize::<CsvRow>() {
        let row = row?;
        let record = Record::new(row.filename, row.offset, row.length, row.url);
        record.validate()?;
        records.push(record);
    }

    Ok(records)
}

/// A parsed CDX index line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdxEntry {
    /// Sort-friendly URL key, kept opaque.
    pub surt: String,
    /// 14-digit capture timestamp.
    pub timestamp: String,
    /// HTTP status recorded at capture time.
    pub status: Option<u16>,
    /// Detected MIME type, falling back to the declared one.
    pub mime: Option<String>,
    /// Location of the capture.
    pub record: Record,
}

#[derive(Debug, Deserialize)]
struct CdxJson {
    url: String,
    filename: String,
    #[serde(deserialize_with = "lenient_u64")]
    offset: u64,
    #[serde(deserialize_with = "lenient_u64")]
    length: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default, rename = "mime-detected")]
    mime_detected: Option<String>,
}

// CDX servers emit numbers as JSON strings.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parses one `SURT TIMESTAMP {json}` line from a CDX index file.
pub fn parse_cdx_line(line: &str) -> CoreResult<CdxEntry> {
    let mut parts = line.trim().splitn(3, ' ');
    let (Some(surt), Some(timestamp), Some(json)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(CoreError::ValidationError(format!(
            "CDX line has fewer than 3 fields: {line}"
        )));
    };

    let parsed: CdxJson = serde_json::from_str(json)
        .map_err(|e| CoreError::ValidationError(format!("CDX json: {e}")))?;

    let record = Record::new(parsed.filename, parsed.offset, parsed.length, parsed.url);
    record.validate()?;

    Ok(CdxEntry {
        surt: surt.to_string(),
        timestamp: timestamp.to_string(),
        status: parsed.status.and_then(|s| s.parse().ok()),
        mime: parsed.mime_detected.or(parsed.mime),
        record,
    })
}
