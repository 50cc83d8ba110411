//! Object store adapter
//!
//! Every call provisions both buckets first (once per process). Uploads are
//! retried with linear backoff; downloads are not, since a partially consumed
//! stream must not be silently repeated.

use crate::domain::{BucketClass, BucketNames, BucketStatus, ObjectStore};
use crate::error::{Result, StorageError};
use crate::provision::{Provisioner, ResourceCreator};
use crate::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default base delay between upload attempts
pub const DEFAULT_UPLOAD_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default number of upload retries after the first attempt
pub const DEFAULT_MAX_UPLOAD_RETRIES: u32 = 2;

/// Where an upload landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub bucket: String,
    pub key: String,
    pub size_bytes: usize,
}

pub struct ObjectStoreAdapter {
    store: Arc<dyn ObjectStore>,
    buckets: BucketNames,
    provisioner: Provisioner,
    upload_policy: RetryPolicy,
}

impl ObjectStoreAdapter {
    pub fn new(store: Arc<dyn ObjectStore>, buckets: BucketNames, upload_policy: RetryPolicy) -> Self {
        Self {
            store,
            buckets,
            provisioner: Provisioner::new(),
            upload_policy,
        }
    }

    /// Adapter with `max_upload_retries` retries after the first attempt
    pub fn with_upload_retries(
        store: Arc<dyn ObjectStore>,
        buckets: BucketNames,
        max_upload_retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self::new(
            store,
            buckets,
            RetryPolicy::linear(max_upload_retries + 1, base_delay),
        )
    }

    pub fn buckets(&self) -> &BucketNames {
        &self.buckets
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioner.is_ensured()
    }

    /// Create both buckets if this process has not done so yet
    pub async fn ensure_buckets(&self) -> Result<()> {
        let creator = BucketCreator(self.store.as_ref());
        self.provisioner.ensure(&creator, &self.buckets.all()).await
    }

    /// Upload `body` under `key`, overwriting any previous object
    ///
    /// # Errors
    ///
    /// `ErrorKind::WriteFailed` once the retry budget is spent, with the last
    /// store error as source.
    pub async fn upload(&self, class: BucketClass, key: &str, body: Vec<u8>) -> Result<UploadReceipt> {
        validate_key(key)?;
        self.ensure_buckets().await?;

        let bucket = self.buckets.for_class(class);
        let size_bytes = body.len();
        let store = self.store.as_ref();

        retry(&self.upload_policy, "object upload", || {
            store.put_object(bucket, key, body.clone())
        })
        .await
        .map_err(|e| {
            StorageError::write_failed(format!(
                "upload of {}/{} failed after {} attempt(s): {}",
                bucket, key, e.attempts, e.last.message
            ))
            .with_source(e.into_inner())
        })?;

        info!(bucket, key, size_bytes, "uploaded object");
        Ok(UploadReceipt {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes,
        })
    }

    /// Read the object at `key`; not retried
    pub async fn download(&self, class: BucketClass, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.ensure_buckets().await?;

        let bucket = self.buckets.for_class(class);
        let body = self.store.get_object(bucket, key).await?;
        debug!(bucket, key, size_bytes = body.len(), "downloaded object");
        Ok(body)
    }

    /// Which configured buckets are visible; never provisions
    pub async fn bucket_status(&self) -> Result<BucketStatus> {
        let names = self.store.list_buckets().await?;
        Ok(BucketStatus {
            raw_present: names.iter().any(|n| n == &self.buckets.raw),
            processed_present: names.iter().any(|n| n == &self.buckets.processed),
        })
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StorageError::invalid_argument(format!(
            "object key must be non-empty and relative: '{}'",
            key
        )));
    }
    Ok(())
}

struct BucketCreator<'a>(&'a dyn ObjectStore);

#[async_trait]
impl ResourceCreator for BucketCreator<'_> {
    async fn exists(&self, name: &str) -> Result<bool> {
        self.0.bucket_exists(name).await
    }

    async fn create(&self, name: &str) -> Result<()> {
        self.0.create_bucket(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::infrastructure::InMemoryObjectStore;

    fn adapter(store: Arc<InMemoryObjectStore>, retries: u32) -> ObjectStoreAdapter {
        ObjectStoreAdapter::with_upload_retries(
            store,
            BucketNames::new("raw", "processed"),
            retries,
            Duration::from_millis(200),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_provisions_buckets_once() {
        let store = Arc::new(InMemoryObjectStore::new());
        let adapter = adapter(store.clone(), 2);

        adapter.upload(BucketClass::Raw, "a/1.json", b"[]".to_vec()).await.unwrap();
        adapter.upload(BucketClass::Processed, "a/2.json", b"[]".to_vec()).await.unwrap();

        assert!(adapter.is_provisioned());
        assert_eq!(store.create_bucket_calls(), 2);
        assert_eq!(store.object("raw", "a/1.json"), Some(b"[]".to_vec()));
        assert_eq!(store.object("processed", "a/2.json"), Some(b"[]".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_retries_then_succeeds() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.fail_next_puts(2);
        let adapter = adapter(store.clone(), 2);

        let receipt = adapter
            .upload(BucketClass::Raw, "orders/1.json", b"[1]".to_vec())
            .await
            .unwrap();

        assert_eq!(store.put_calls(), 3);
        assert_eq!(receipt.bucket, "raw");
        assert_eq!(receipt.size_bytes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_exhaustion_is_write_failed() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.fail_next_puts(10);
        let adapter = adapter(store.clone(), 2);

        let err = adapter
            .upload(BucketClass::Raw, "orders/1.json", b"[1]".to_vec())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::WriteFailed);
        assert!(err.message.contains("3 attempt(s)"));
        assert_eq!(store.put_calls(), 3);
    }

    #[tokio::test]
    async fn test_download_is_not_retried() {
        let store = Arc::new(InMemoryObjectStore::new());
        let adapter = adapter(store.clone(), 2);

        let err = adapter.download(BucketClass::Raw, "missing.json").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_download_round_trip() {
        let store = Arc::new(InMemoryObjectStore::new());
        let adapter = adapter(store, 0);

        adapter.upload(BucketClass::Raw, "k.json", b"{}".to_vec()).await.unwrap();
        let body = adapter.download(BucketClass::Raw, "k.json").await.unwrap();
        assert_eq!(body, b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_rejects_absolute_key() {
        let store = Arc::new(InMemoryObjectStore::new());
        let adapter = adapter(store.clone(), 2);

        let err = adapter.upload(BucketClass::Raw, "/etc/x", vec![]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(store.create_bucket_calls(), 0);
    }

    #[tokio::test]
    async fn test_bucket_status_does_not_provision() {
        let store = Arc::new(InMemoryObjectStore::with_buckets(&["processed"]));
        let adapter = adapter(store.clone(), 2);

        let status = adapter.bucket_status().await.unwrap();
        assert!(!status.raw_present);
        assert!(status.processed_present);
        assert!(!adapter.is_provisioned());
        assert_eq!(store.create_bucket_calls(), 0);
    }
}
