//! WARC container handling for ccfetch.
//!
//! Fetched windows are gzip-decoded member by member, parsed as WARC records
//! and filtered down to the HTTP payloads the caller asked for.

pub mod compression;
pub mod extractor;
pub mod http;
pub mod record;

pub use compression::{compress_member, Compression, GzipMembers, GZIP_MAGIC};
pub use extractor::{ContainerExtractor, ExtractedPayload, Extraction};
pub use http::HttpResponse;
pub use record::{PlainRecords, WarcEntries, WarcEntry};
