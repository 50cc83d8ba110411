//! datapipe-storage: object storage plumbing for the ingestion gateway
//!
//! ## Layout
//!
//! - `retry`: bounded retry with linear or exponential backoff
//! - `provision`: one-time, concurrency-safe creation of shared resources
//! - `domain`: bucket model and the `ObjectStore` port
//! - `adapter`: `ObjectStoreAdapter`, provisioning + retried uploads
//! - `infrastructure`: in-memory store, and S3/MinIO behind feature `s3`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use datapipe_storage::{BucketClass, BucketNames, InMemoryObjectStore, ObjectStoreAdapter};
//!
//! let adapter = ObjectStoreAdapter::with_upload_retries(
//!     Arc::new(InMemoryObjectStore::new()),
//!     BucketNames::new("raw-data", "processed-data"),
//!     2,
//!     Duration::from_millis(200),
//! );
//! adapter.upload(BucketClass::Raw, "orders/20240101000000.json", body).await?;
//! ```

pub mod adapter;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod provision;
pub mod retry;

pub use adapter::{
    ObjectStoreAdapter, UploadReceipt, DEFAULT_MAX_UPLOAD_RETRIES, DEFAULT_UPLOAD_RETRY_BASE_DELAY,
};
pub use domain::{BucketClass, BucketNames, BucketStatus, ObjectStore};
pub use error::{ErrorKind, Result, StorageError};
pub use infrastructure::InMemoryObjectStore;
pub use provision::{Provisioner, ResourceCreator};
pub use retry::{retry, retry_if, Backoff, RetryError, RetryPolicy};

#[cfg(feature = "s3")]
pub use infrastructure::{S3Config, S3ObjectStore};
