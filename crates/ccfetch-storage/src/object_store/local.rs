//! Local filesystem implementation of ArchiveStore
//!
//! Serves archive files from a directory mirror. Keys are relative paths below
//! the root; ranges are honoured with a seek and a bounded read.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use ccfetch_core::{ByteRange, CoreError, CoreResult};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{range_label, ArchiveStore, StoreResponse};

/// Archive store reading from a local directory.
///
/// # Example
///
/// ```rust,no_run
/// use ccfetch_storage::object_store::{ArchiveStore, LocalArchiveStore};
///
/// #[tokio::main]
/// async fn main() -> ccfetch_core::CoreResult<()> {
///     let store = LocalArchiveStore::new("/data/commoncrawl");
///     let size = store.size("crawl-data/CC-MAIN-2024-22/segments/1/warc/CC-MAIN-1.warc.gz").await?;
///     println!("{size} bytes");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LocalArchiveStore {
    root: PathBuf,
}

impl LocalArchiveStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Convert key to full filesystem path, refusing to leave the root.
    fn full_path(&self, key: &str) -> CoreResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(CoreError::ValidationError(format!(
                "archive key escapes store root: {key}"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn io_error(key: &str, label: &str, err: std::io::Error) -> CoreError {
        if err.kind() == std::io::ErrorKind::NotFound {
            CoreError::not_found(key, label)
        } else {
            CoreError::from(err)
        }
    }
}

#[async_trait]
impl ArchiveStore for LocalArchiveStore {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> CoreResult<StoreResponse> {
        let label = range_label(range);
        let path = self.full_path(key)?;

        let Some(range) = range else {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| Self::io_error(key, &label, e))?;
            return Ok(StoreResponse {
                body: Bytes::from(data),
                partial: false,
                served: None,
            });
        };

        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Self::io_error(key, &label, e))?;

        let file_len = file.metadata().await?.len();
        if range.start >= file_len {
            // Same answer an HTTP server gives: 416 Range Not Satisfiable
            return Err(CoreError::rejected(key, label, 416));
        }

        file.seek(SeekFrom::Start(range.start)).await?;
        let mut data = Vec::with_capacity(range.len().min(file_len - range.start) as usize);
        file.take(range.len()).read_to_end(&mut data).await?;

        Ok(StoreResponse {
            body: Bytes::from(data),
            partial: true,
            served: Some(ByteRange {
                start: range.start,
                end: range.end.min(file_len - 1),
            }),
        })
    }

    async fn size(&self, key: &str) -> CoreResult<u64> {
        let path = self.full_path(key)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Self::io_error(key, "full", e))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_with_file() -> (TempDir, LocalArchiveStore) {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("crawl-data/seg");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("a.warc.gz"), b"0123456789")
            .await
            .unwrap();
        let store = LocalArchiveStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_ranged_read() {
        let (_dir, store) = store_with_file().await;
        let response = store
            .get("crawl-data/seg/a.warc.gz", Some(ByteRange::new(2, 5).unwrap()))
            .await
            .unwrap();
        assert!(response.partial);
        assert_eq!(&response.body[..], b"2345");
    }

    #[tokio::test]
    async fn test_range_past_end_is_clipped() {
        let (_dir, store) = store_with_file().await;
        let response = store
            .get("crawl-data/seg/a.warc.gz", Some(ByteRange::new(8, 20).unwrap()))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"89");
    }

    #[tokio::test]
    async fn test_range_beyond_file_rejected() {
        let (_dir, store) = store_with_file().await;
        let err = store
            .get("crawl-data/seg/a.warc.gz", Some(ByteRange::new(10, 20).unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Rejected { status: 416, .. }));
    }

    #[tokio::test]
    async fn test_full_read_and_size() {
        let (_dir, store) = store_with_file().await;
        let response = store.get("crawl-data/seg/a.warc.gz", None).await.unwrap();
        assert!(!response.partial);
        assert_eq!(response.body.len(), 10);
        assert_eq!(store.size("crawl-data/seg/a.warc.gz").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_and_escaping_keys() {
        let (_dir, store) = store_with_file().await;
        assert!(matches!(
            store.get("nope.warc.gz", None).await.unwrap_err(),
            CoreError::NotFound { .. }
        ));
        assert!(matches!(
            store.size("../etc/passwd").await.unwrap_err(),
            CoreError::ValidationError(_)
        ));
    }
}
