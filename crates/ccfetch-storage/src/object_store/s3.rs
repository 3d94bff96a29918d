//! AWS S3 implementation of ArchiveStore
//!
//! Ranged GetObject against the public crawl bucket through the `object_store`
//! AWS backend. Also works with S3-compatible endpoints (MinIO mirrors).

use std::sync::Arc;

use async_trait::async_trait;
use ccfetch_core::{ByteRange, CoreError, CoreResult, StoreConfig};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Error as ObjectStoreError, GetOptions, GetRange, ObjectStore};
use tracing::debug;

use super::{range_label, ArchiveStore, StoreResponse};

/// S3-backed archive store.
pub struct S3ArchiveStore {
    client: Arc<dyn ObjectStore>,
    bucket: String,
}

impl S3ArchiveStore {
    /// Create a store for `config.bucket`.
    ///
    /// Static keys are used when configured; otherwise credentials come from
    /// the standard AWS environment variables.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConfigError` if the S3 client cannot be built
    pub fn new(config: &StoreConfig) -> CoreResult<Self> {
        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => AmazonS3Builder::new()
                .with_access_key_id(access)
                .with_secret_access_key(secret),
            _ => AmazonS3Builder::from_env(),
        };

        builder = builder
            .with_region(&config.region)
            .with_bucket_name(&config.bucket);

        // Custom endpoint for MinIO or other S3-compatible mirrors
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }

        let client = builder
            .build()
            .map_err(|e| CoreError::ConfigError(format!("failed to create S3 client: {e}")))?;

        Ok(Self::from_object_store(Arc::new(client), &config.bucket))
    }

    /// Wrap an existing `object_store` client (in-memory stores in tests).
    pub fn from_object_store(client: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    fn map_error(key: &str, label: &str, err: ObjectStoreError) -> CoreError {
        match err {
            ObjectStoreError::NotFound { .. } => CoreError::not_found(key, label),
            ObjectStoreError::NotSupported { .. } | ObjectStoreError::NotImplemented => {
                CoreError::rejected(key, label, 501)
            }
            other => CoreError::transient(key, label, other.to_string()),
        }
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> CoreResult<StoreResponse> {
        let label = range_label(range);
        let path = ObjectPath::from(key);

        let options = GetOptions {
            range: range.map(|r| GetRange::Bounded(r.start as usize..(r.end as usize + 1))),
            ..Default::default()
        };

        let result = self
            .client
            .get_opts(&path, options)
            .await
            .map_err(|e| Self::map_error(key, &label, e))?;

        let served = range.and_then(|_| {
            let served = &result.range;
            (served.end > served.start).then(|| ByteRange {
                start: served.start as u64,
                end: served.end as u64 - 1,
            })
        });

        let body = result
            .bytes()
            .await
            .map_err(|e| Self::map_error(key, &label, e))?;

        debug!(
            bucket = %self.bucket,
            key,
            range = %label,
            bytes = body.len(),
            "retrieved archive object"
        );

        Ok(StoreResponse {
            body,
            partial: served.is_some(),
            served,
        })
    }

    async fn size(&self, key: &str) -> CoreResult<u64> {
        let meta = self
            .client
            .head(&ObjectPath::from(key))
            .await
            .map_err(|e| Self::map_error(key, "full", e))?;
        Ok(meta.size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use bytes::Bytes;
    use object_store::PutPayload;

    async fn test_store() -> S3ArchiveStore {
        let memory = InMemory::new();
        memory
            .put(
                &ObjectPath::from("crawl-data/seg/a.warc.gz"),
                PutPayload::from_bytes(Bytes::from_static(b"0123456789abcdef")),
            )
            .await
            .unwrap();
        S3ArchiveStore::from_object_store(Arc::new(memory), "commoncrawl")
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let store = test_store().await;
        let response = store
            .get("crawl-data/seg/a.warc.gz", Some(ByteRange::new(4, 7).unwrap()))
            .await
            .unwrap();
        assert!(response.partial);
        assert_eq!(response.served, Some(ByteRange::new(4, 7).unwrap()));
        assert_eq!(&response.body[..], b"4567");
    }

    #[tokio::test]
    async fn test_full_get_and_size() {
        let store = test_store().await;
        let response = store.get("crawl-data/seg/a.warc.gz", None).await.unwrap();
        assert!(!response.partial);
        assert_eq!(response.body.len(), 16);
        assert_eq!(store.size("crawl-data/seg/a.warc.gz").await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = test_store().await;
        let err = store.get("missing.warc.gz", None).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert!(!err.is_retryable());
    }
}
