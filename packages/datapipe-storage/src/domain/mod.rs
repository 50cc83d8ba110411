//! Domain layer for object storage
//!
//! # Domain Models
//!
//! - `BucketClass`: logical bucket (raw snapshots vs processed output)
//! - `BucketNames`: physical names bound to each class
//!
//! # Port Trait
//!
//! - `ObjectStore`: narrow client interface over an S3-compatible service.
//!   Implementations live in `infrastructure`; the service itself is external.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Logical bucket selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketClass {
    /// Raw ingested snapshots
    Raw,
    /// Downstream processed output
    Processed,
}

impl BucketClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketClass::Raw => "raw",
            BucketClass::Processed => "processed",
        }
    }
}

impl fmt::Display for BucketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Physical bucket names for each class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketNames {
    pub raw: String,
    pub processed: String,
}

impl BucketNames {
    pub fn new(raw: impl Into<String>, processed: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            processed: processed.into(),
        }
    }

    pub fn for_class(&self, class: BucketClass) -> &str {
        match class {
            BucketClass::Raw => &self.raw,
            BucketClass::Processed => &self.processed,
        }
    }

    /// Both names, raw first
    pub fn all(&self) -> [&str; 2] {
        [&self.raw, &self.processed]
    }
}

/// Bucket presence as seen by a health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStatus {
    pub raw_present: bool,
    pub processed_present: bool,
}

impl BucketStatus {
    pub fn any_present(&self) -> bool {
        self.raw_present || self.processed_present
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: ObjectStore
// ═══════════════════════════════════════════════════════════════════════════

/// S3-compatible object store client
///
/// # Implementations
///
/// - `InMemoryObjectStore`: process-local store for tests and dry runs
/// - `S3ObjectStore` (feature `s3`): MinIO / AWS via `aws-sdk-s3`
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `bucket` exists
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create `bucket`
    ///
    /// # Errors
    ///
    /// `ErrorKind::AlreadyExists` when another client won the race.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Put `body` at `key`, overwriting any existing object
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Read the full object at `key`
    ///
    /// # Errors
    ///
    /// `ErrorKind::NotFound` when the key or bucket does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Names of all visible buckets
    async fn list_buckets(&self) -> Result<Vec<String>>;
}
