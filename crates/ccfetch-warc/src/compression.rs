//! Gzip handling for archive containers
//!
//! Crawl archives are multi-member gzip streams, one member per WARC record.
//! Members are decoded one at a time so a corrupt member costs only itself:
//! decoding resumes at the next gzip header.

use std::io::{Read, Write};

use bytes::Bytes;
use ccfetch_core::{CoreError, CoreResult};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;

/// Gzip member header: magic bytes plus the deflate method.
pub const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// How container bytes are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Multi-member gzip.
    Gzip,
    /// Plain WARC.
    None,
    /// Decide from the leading bytes.
    #[default]
    Auto,
}

impl Compression {
    /// Gzip if `data` starts with a gzip member header, plain otherwise.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&GZIP_MAGIC) {
            Self::Gzip
        } else {
            Self::None
        }
    }

    /// Replaces `Auto` with the detected compression.
    pub fn resolve(self, data: &[u8]) -> Self {
        match self {
            Self::Auto => Self::detect(data),
            other => other,
        }
    }
}

/// Gzip a single member (WARC writers emit one member per record).
pub fn compress_member(data: &[u8]) -> CoreResult<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(Bytes::from(compressed))
}

/// Iterator over the decoded members of a gzip stream.
///
/// Yields `Err(CoreError::MalformedContainer)` for a member that fails to
/// decode, then continues from the next gzip header after it.
#[derive(Debug, Clone)]
pub struct GzipMembers {
    data: Bytes,
    pos: usize,
}

impl GzipMembers {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Offset (in the compressed input) of the next member to decode.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn find_magic(&self, from: usize) -> Option<usize> {
        self.data
            .get(from..)?
            .windows(GZIP_MAGIC.len())
            .position(|w| w == GZIP_MAGIC)
            .map(|p| from + p)
    }

    fn decode_at(&self, start: usize) -> std::io::Result<(Vec<u8>, usize)> {
        let input = &self.data[start..];
        let mut decoder = GzDecoder::new(input);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        let consumed = input.len() - decoder.into_inner().len();
        Ok((out, consumed))
    }
}

impl Iterator for GzipMembers {
    type Item = CoreResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        if !self.data[start..].starts_with(&GZIP_MAGIC) {
            // Padding or garbage between members.
            let skipped_to = self.find_magic(start);
            let garbage = &self.data[start..skipped_to.unwrap_or(self.data.len())];
            self.pos = skipped_to.unwrap_or(self.data.len());
            if garbage.iter().all(|b| b.is_ascii_whitespace() || *b == 0) {
                return self.next();
            }
            return Some(Err(CoreError::MalformedContainer(format!(
                "{} bytes of non-gzip data at offset {start}",
                garbage.len()
            ))));
        }

        match self.decode_at(start) {
            Ok((member, consumed)) if consumed > 0 => {
                self.pos = start + consumed;
                Some(Ok(Bytes::from(member)))
            }
            Ok(_) => {
                self.pos = self.data.len();
                None
            }
            Err(e) => {
                self.pos = self.find_magic(start + 1).unwrap_or(self.data.len());
                Some(Err(CoreError::MalformedContainer(format!(
                    "corrupt gzip member at offset {start}: {e}"
                ))))
            }
        }
    }
}
