//! HTTPS implementation of ArchiveStore
//!
//! Issues plain GET requests with a `Range` header against a base URL. Bodies
//! are read chunk by chunk so a dropped connection is reported as a truncated
//! transfer rather than a generic error.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use ccfetch_core::{ByteRange, CoreError, CoreResult, StoreConfig};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::debug;

use super::{range_label, ArchiveStore, StoreResponse};

// Pre-allocation cap; bodies can still grow past it.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Archive store reached over HTTP(S).
///
/// Transparent decompression is left off: archive members are gzip on disk and
/// must arrive byte-exact for offsets to line up.
#[derive(Debug, Clone)]
pub struct HttpArchiveStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchiveStore {
    /// Create a store for `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConfigError` if the HTTP client cannot be built
    pub fn new(config: &StoreConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| CoreError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, &config.base_url))
    }

    /// Create a store around an existing client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { client, base_url }
    }

    /// Full URL of an archive file.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}{}", self.base_url, key.trim_start_matches('/'))
    }
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Served range from `Content-Range: bytes start-end/total`.
fn content_range(headers: &HeaderMap) -> Option<ByteRange> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (span, _total) = value.trim().strip_prefix("bytes ")?.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    ByteRange::new(start.trim().parse().ok()?, end.trim().parse().ok()?).ok()
}

fn transport_error(key: &str, label: &str, err: reqwest::Error) -> CoreError {
    let message = if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connect failed: {err}")
    } else {
        err.to_string()
    };
    CoreError::transient(key, label, message)
}

#[async_trait]
impl ArchiveStore for HttpArchiveStore {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> CoreResult<StoreResponse> {
        let label = range_label(range);
        let url = self.url_for(key);

        let mut request = self.client.get(&url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| transport_error(key, &label, e))?;

        let status = response.status();
        let served = match status {
            // A 206 without Content-Range cannot be placed in the archive.
            StatusCode::PARTIAL_CONTENT => match content_range(response.headers()) {
                Some(served) => Some(served),
                None => return Err(CoreError::rejected(key, label, 206)),
            },
            StatusCode::OK => None,
            other => {
                let retry_after = header_u64(response.headers(), RETRY_AFTER);
                return Err(CoreError::from_status(
                    key,
                    label,
                    other.as_u16(),
                    retry_after,
                ));
            }
        };

        let expected = header_u64(response.headers(), CONTENT_LENGTH);
        let mut body = BytesMut::with_capacity(expected.unwrap_or(0).min(MAX_PREALLOC) as usize);

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    return Err(match expected {
                        Some(expected) => CoreError::Truncated {
                            archive_file: key.to_string(),
                            range: label,
                            expected,
                            received: body.len() as u64,
                        },
                        None => transport_error(key, &label, e),
                    });
                }
            }
        }

        if let Some(expected) = expected {
            if (body.len() as u64) < expected {
                return Err(CoreError::Truncated {
                    archive_file: key.to_string(),
                    range: label,
                    expected,
                    received: body.len() as u64,
                });
            }
        }

        debug!(
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            "archive response received"
        );

        Ok(StoreResponse {
            body: body.freeze(),
            partial: served.is_some(),
            served,
        })
    }

    async fn size(&self, key: &str) -> CoreResult<u64> {
        let response = self
            .client
            .head(self.url_for(key))
            .send()
            .await
            .map_err(|e| transport_error(key, "full", e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = header_u64(response.headers(), RETRY_AFTER);
            return Err(CoreError::from_status(
                key,
                "full",
                status.as_u16(),
                retry_after,
            ));
        }

        header_u64(response.headers(), CONTENT_LENGTH).ok_or_else(|| {
            CoreError::transient(key, "full", "HEAD response carried no Content-Length")
        })
    }
}
