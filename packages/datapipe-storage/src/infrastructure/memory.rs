//! In-memory ObjectStore
//!
//! Keeps buckets in a map behind a mutex and counts calls, so tests can
//! assert how often the adapter reached the store. Failure injection covers
//! transient put errors and a fully unreachable endpoint.

use crate::domain::ObjectStore;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    put_calls: AtomicU32,
    get_calls: AtomicU32,
    create_bucket_calls: AtomicU32,
    failing_puts: AtomicU32,
    unavailable: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `names` already created
    pub fn with_buckets(names: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut buckets = store.buckets.lock();
            for name in names {
                buckets.insert(name.to_string(), BTreeMap::new());
            }
        }
        store
    }

    /// Fail the next `n` puts with a transient error
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Make every call fail as if the endpoint were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets.lock().get(bucket)?.get(key).cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_bucket_calls(&self) -> u32 {
        self.create_bucket_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("object store endpoint unreachable"));
        }
        Ok(())
    }

    fn take_put_failure(&self) -> bool {
        self.failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.buckets.lock().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.check_available()?;
        self.create_bucket_calls.fetch_add(1, Ordering::SeqCst);
        let mut buckets = self.buckets.lock();
        if buckets.contains_key(bucket) {
            return Err(StorageError::already_exists(bucket));
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.take_put_failure() {
            return Err(StorageError::unavailable(format!(
                "injected put failure for {}/{}",
                bucket, key
            )));
        }

        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::not_found(format!("bucket {}", bucket)))?;
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.object(bucket, key)
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let mut names: Vec<String> = self.buckets.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_create_bucket_twice_reports_already_exists() {
        let store = InMemoryObjectStore::new();
        store.create_bucket("raw").await.unwrap();
        let err = store.create_bucket("raw").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(store.create_bucket_calls(), 2);
    }

    #[tokio::test]
    async fn test_put_into_missing_bucket_fails() {
        let store = InMemoryObjectStore::new();
        let err = store.put_object("nope", "k", vec![1]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryObjectStore::with_buckets(&["raw"]);
        store.fail_next_puts(1);

        assert!(store.put_object("raw", "k", vec![1]).await.is_err());
        store.put_object("raw", "k", vec![2]).await.unwrap();
        assert_eq!(store.object("raw", "k"), Some(vec![2]));
        assert_eq!(store.put_calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryObjectStore::with_buckets(&["raw"]);
        store.set_unavailable(true);

        let err = store.list_buckets().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(store.bucket_exists("raw").await.is_err());
    }

    #[tokio::test]
    async fn test_list_buckets_sorted() {
        let store = InMemoryObjectStore::with_buckets(&["b", "a"]);
        assert_eq!(store.list_buckets().await.unwrap(), vec!["a", "b"]);
        assert!(store.keys("a").is_empty());
    }
}
