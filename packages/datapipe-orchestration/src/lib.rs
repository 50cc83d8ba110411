/*
 * Datapipe Orchestration - ingestion and orchestration gateway
 *
 * Batch: relational source -> object store snapshot -> validation -> workflow run
 * Streaming: envelope -> broker, plus a monitoring workflow run
 *
 * Architecture:
 * - Ports as async traits (SourceReader, DataValidator, WorkflowTrigger, MessageProducer)
 * - Storage, provisioning and retry in datapipe-storage
 * - Health probes aggregated concurrently, failures folded into the report
 */

pub mod batch;
pub mod config;
pub mod error;
pub mod governance;
pub mod health;
pub mod http;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod publisher;
pub mod source;
pub mod streaming;
pub mod validator;
pub mod workflow;

#[cfg(test)]
mod testing;

// Re-exports
pub use batch::{BatchOrchestrator, IngestRequest, IngestResult, Stage, StageFailure};
pub use config::{ConfigError, DatapipeConfig, Validatable};
pub use error::{ErrorCategory, PipelineError, Result};
pub use governance::{LineageClient, ModelTrackingClient};
pub use health::{HealthAggregator, HealthEntry, HealthReport, HealthStatus, Probe};
#[cfg(feature = "kafka")]
pub use kafka::KafkaProducer;
pub use publisher::{MessageProducer, MessagePublisher, ShutdownReport};
pub use source::{ColumnValue, PostgresProbe, RowMapping, SourceReader, SqlSourceReader};
pub use streaming::{MonitoringRun, StreamRequest, StreamingOrchestrator};
pub use validator::{DataValidator, ExternalValidator};
pub use workflow::{JobKind, WorkflowClient, WorkflowTrigger};
