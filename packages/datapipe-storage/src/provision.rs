//! One-time provisioning of shared prerequisites (buckets)
//!
//! The `ensured` flag moves false -> true once and never reverts. Concurrent
//! first callers serialize on a single gate and re-check the flag inside it,
//! so each resource sees at most one create call per successful pass.

use crate::error::{ErrorKind, Result, StorageError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Check-then-create capability over named resources
#[async_trait]
pub trait ResourceCreator: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;

    /// May fail with `ErrorKind::AlreadyExists`, which counts as success
    async fn create(&self, name: &str) -> Result<()>;
}

/// Double-checked lazy provisioner
#[derive(Debug, Default)]
pub struct Provisioner {
    ensured: AtomicBool,
    gate: Mutex<()>,
}

impl Provisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ensured(&self) -> bool {
        self.ensured.load(Ordering::Acquire)
    }

    /// Make sure every resource in `resources` exists
    ///
    /// On failure the flag stays unset and the gate is released, so the next
    /// caller starts over.
    pub async fn ensure<C>(&self, creator: &C, resources: &[&str]) -> Result<()>
    where
        C: ResourceCreator + ?Sized,
    {
        if self.is_ensured() {
            return Ok(());
        }

        let _guard = self.gate.lock().await;
        if self.is_ensured() {
            return Ok(());
        }

        for name in resources {
            if let Err(e) = ensure_one(creator, name).await {
                warn!(resource = %name, error = %e, "provisioning failed, will retry on next call");
                return Err(e);
            }
        }

        self.ensured.store(true, Ordering::Release);
        info!(resources = ?resources, "storage resources provisioned");
        Ok(())
    }
}

async fn ensure_one<C>(creator: &C, name: &str) -> Result<()>
where
    C: ResourceCreator + ?Sized,
{
    if creator.exists(name).await? {
        debug!(resource = name, "resource already present");
        return Ok(());
    }

    match creator.create(name).await {
        Ok(()) => {
            info!(resource = name, "created resource");
            Ok(())
        }
        Err(e) if e.kind == ErrorKind::AlreadyExists => {
            debug!(resource = name, "resource created concurrently elsewhere");
            Ok(())
        }
        Err(e) => Err(StorageError::provisioning(format!(
            "failed to create '{}': {}",
            name, e.message
        ))
        .with_source(e)),
    }
}
