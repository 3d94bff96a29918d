//! Container extractor: pulls matching HTTP payloads out of WARC bytes.
//!
//! Input is a fetched byte window (one gzip member per record, several
//! members, or plain WARC split per record). Output is a lazy iterator of payloads; malformed
//! members and records are logged and skipped, never returned as errors.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::compression::{Compression, GzipMembers};
use crate::http::HttpResponse;
use crate::record::{PlainRecords, WarcEntries, WarcEntry};

/// Payload of one matching `response` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPayload {
    /// `WARC-Target-URI` of the record.
    pub source_url: String,
    /// Decoded HTTP body.
    pub content: Bytes,
    /// HTTP `Content-Type`, empty when the response had none.
    pub content_type: String,
    pub warc_record_id: Option<String>,
    pub warc_date: Option<String>,
}

impl ExtractedPayload {
    /// Content as text: UTF-8 when valid, ISO-8859-1 otherwise.
    ///
    /// Latin-1 maps every byte to a char, so no document is dropped for its
    /// encoding.
    pub fn text(&self) -> Cow<'_, str> {
        match std::str::from_utf8(&self.content) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => Cow::Owned(self.content.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

type ContentPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Extracts payloads whose content type satisfies a predicate.
#[derive(Clone)]
pub struct ContainerExtractor {
    predicate: ContentPredicate,
}

impl ContainerExtractor {
    /// Extractor for HTML responses.
    pub fn new() -> Self {
        Self::html()
    }

    /// Matches content types containing `html` (case-insensitive).
    pub fn html() -> Self {
        Self::with_predicate(|content_type| content_type.to_ascii_lowercase().contains("html"))
    }

    /// Matches content types accepted by `predicate`.
    pub fn with_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, content_type: &str) -> bool {
        (self.predicate)(content_type)
    }

    /// Lazily extracts every matching payload from `data`.
    pub fn extract(&self, data: Bytes, compression: Compression) -> Extraction {
        let source = match compression.resolve(&data) {
            Compression::Gzip => Source::Members(GzipMembers::new(data)),
            _ => Source::Plain(PlainRecords::new(data)),
        };

        Extraction {
            predicate: self.predicate.clone(),
            source,
            current: None,
            skipped: 0,
        }
    }

    /// First matching payload in `data`, if any.
    pub fn first_match(&self, data: Bytes, compression: Compression) -> Option<ExtractedPayload> {
        self.extract(data, compression).next()
    }
}

impl Default for ContainerExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContainerExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerExtractor").finish_non_exhaustive()
    }
}

enum Source {
    Members(GzipMembers),
    Plain(PlainRecords),
}

/// Single-pass iterator returned by [`ContainerExtractor::extract`].
pub struct Extraction {
    predicate: ContentPredicate,
    source: Source,
    current: Option<WarcEntries>,
    skipped: usize,
}

impl Extraction {
    /// Malformed members or records skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn next_block(&mut self) -> Option<Bytes> {
        match &mut self.source {
            Source::Plain(records) => records.next(),
            Source::Members(members) => loop {
                match members.next()? {
                    Ok(member) => return Some(member),
                    Err(e) => {
                        self.skipped += 1;
                        warn!(error = %e, "skipping unreadable gzip member");
                    }
                }
            },
        }
    }

    fn payload_from(&mut self, entry: WarcEntry) -> Option<ExtractedPayload> {
        if !entry.is_response() {
            return None;
        }

        let response = match HttpResponse::parse(&entry.block) {
            Ok(response) => response,
            Err(e) => {
                self.skipped += 1;
                warn!(
                    url = entry.target_uri.as_deref().unwrap_or(""),
                    error = %e,
                    "skipping malformed response record"
                );
                return None;
            }
        };

        let content_type = response.content_type().unwrap_or_default().to_string();
        if !(self.predicate)(&content_type) {
            debug!(
                url = entry.target_uri.as_deref().unwrap_or(""),
                content_type = %content_type,
                "response does not match content filter"
            );
            return None;
        }

        Some(ExtractedPayload {
            source_url: entry.target_uri.unwrap_or_default(),
            content: response.decoded_body(),
            content_type,
            warc_record_id: entry.record_id,
            warc_date: entry.date,
        })
    }
}

impl Iterator for Extraction {
    type Item = ExtractedPayload;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entries) = self.current.as_mut() {
                match entries.next() {
                    Some(Ok(entry)) => {
                        if let Some(payload) = self.payload_from(entry) {
                            return Some(payload);
                        }
                    }
                    Some(Err(e)) => {
                        self.skipped += 1;
                        warn!(error = %e, "skipping malformed WARC record");
                        self.current = None;
                    }
                    None => self.current = None,
                }
                continue;
            }

            let block = self.next_block()?;
            self.current = Some(WarcEntries::new(block));
        }
    }
}
