//! Infrastructure layer - ObjectStore adapters
//!
//! - `memory`: process-local store (tests, dry runs)
//! - `s3`: S3-compatible services (MinIO, AWS), feature `s3`

pub mod memory;

#[cfg(feature = "s3")]
pub mod s3;

pub use memory::InMemoryObjectStore;

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};
