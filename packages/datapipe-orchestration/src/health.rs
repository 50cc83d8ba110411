//! Health aggregation
//!
//! Each registered probe runs in its own task bounded by the probe timeout.
//! Errors, timeouts and panics become Unhealthy entries; `check` itself never
//! fails. The overall status is the worst entry.

use crate::error::Result;
use crate::governance::ModelTrackingClient;
use crate::publisher::MessageProducer;
use crate::source::{PostgresProbe, SourceReader};
use crate::workflow::WorkflowClient;
use datapipe_storage::ObjectStoreAdapter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ordered so that `max` picks the worst status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Unhealthy => "Unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEntry {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HealthEntry {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            description: None,
        }
    }

    pub fn degraded(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            description: Some(description.into()),
        }
    }

    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            description: Some(description.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub entries: BTreeMap<String, HealthEntry>,
}

impl HealthReport {
    fn from_entries(entries: BTreeMap<String, HealthEntry>) -> Self {
        let overall = entries
            .values()
            .map(|e| e.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self { overall, entries }
    }
}

/// One dependency check
#[derive(Clone)]
pub enum Probe {
    Source(Arc<dyn SourceReader>),
    Postgres(PostgresProbe),
    ObjectStore(Arc<ObjectStoreAdapter>),
    Broker {
        producer: Arc<dyn MessageProducer>,
        topic: String,
    },
    Orchestrator(Arc<WorkflowClient>),
    ModelTracking(Arc<ModelTrackingClient>),
    /// Client could not be built; reported Unhealthy without a network call
    Unavailable(String),
}

impl Probe {
    async fn run(self, timeout: Duration) -> Result<HealthEntry> {
        match self {
            Probe::Source(reader) => {
                reader.ping().await?;
                Ok(HealthEntry::healthy())
            }
            Probe::Postgres(probe) => {
                probe.ping().await?;
                Ok(HealthEntry::healthy())
            }
            Probe::ObjectStore(adapter) => {
                let status = adapter.bucket_status().await?;
                if status.any_present() {
                    Ok(HealthEntry::healthy())
                } else {
                    Ok(HealthEntry::degraded("reachable but buckets missing"))
                }
            }
            Probe::Broker { producer, topic } => {
                if producer.topic_available(&topic, timeout).await? {
                    Ok(HealthEntry::healthy())
                } else {
                    Ok(HealthEntry::degraded(format!("topic '{}' unavailable", topic)))
                }
            }
            Probe::Orchestrator(client) => client.health().await,
            Probe::ModelTracking(client) => client.health().await,
            Probe::Unavailable(reason) => Ok(HealthEntry::unhealthy(reason)),
        }
    }
}

pub struct HealthAggregator {
    probes: BTreeMap<String, Probe>,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: BTreeMap::new(),
            probe_timeout,
        }
    }

    /// Register `probe` under `name`, replacing any earlier one
    pub fn register(&mut self, name: impl Into<String>, probe: Probe) -> &mut Self {
        self.probes.insert(name.into(), probe);
        self
    }

    /// Register the probe a fallible constructor produced; a construction
    /// error is kept as an Unhealthy entry instead of aborting the report
    pub fn register_result(&mut self, name: impl Into<String>, probe: Result<Probe>) -> &mut Self {
        let probe = probe.unwrap_or_else(|e| Probe::Unavailable(e.to_string()));
        self.register(name, probe)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub async fn check(&self) -> HealthReport {
        let timeout = self.probe_timeout;
        let (names, tasks): (Vec<_>, Vec<_>) = self
            .probes
            .iter()
            .map(|(name, probe)| {
                let probe = probe.clone();
                let task = tokio::spawn(async move {
                    tokio::time::timeout(timeout, probe.run(timeout)).await
                });
                (name.clone(), task)
            })
            .unzip();

        let results = futures::future::join_all(tasks).await;

        let mut entries = BTreeMap::new();
        for (name, result) in names.into_iter().zip(results) {
            let entry = match result {
                Ok(Ok(Ok(entry))) => entry,
                Ok(Ok(Err(e))) => HealthEntry::unhealthy(e.to_string()),
                Ok(Err(_)) => HealthEntry::unhealthy(format!("probe timed out after {:?}", timeout)),
                Err(e) => HealthEntry::unhealthy(format!("probe panicked: {}", e)),
            };

            if entry.status == HealthStatus::Healthy {
                debug!(probe = %name, "healthy");
            } else {
                warn!(
                    probe = %name,
                    status = %entry.status,
                    description = entry.description.as_deref().unwrap_or(""),
                    "dependency not healthy"
                );
            }
            entries.insert(name, entry);
        }

        HealthReport::from_entries(entries)
    }
}
