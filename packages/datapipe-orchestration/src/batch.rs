//! Batch ingestion pipeline
//!
//! Stages run strictly in order: read, serialize, upload, validate, trigger.
//! Read and upload failures abort the call. Once the snapshot is stored the
//! call succeeds; validation and trigger failures are reported in
//! [`IngestResult::failures`] instead. Nothing is rolled back.

use crate::error::{PipelineError, Result};
use crate::source::{validate_limit, validate_table_identifier, SourceReader};
use crate::validator::DataValidator;
use crate::workflow::{JobKind, WorkflowTrigger};
use chrono::{DateTime, Utc};
use datapipe_storage::{BucketClass, ObjectStoreAdapter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Longest accepted destination prefix, before trimming
pub const MAX_PREFIX_LEN: usize = 200;

/// Suite run when a request asks for validation
pub const DEFAULT_VALIDATION_SUITE: &str = "great_expectations/expectations";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_table: String,

    #[serde(default)]
    pub destination_prefix: Option<String>,

    #[serde(default)]
    pub limit: Option<u32>,

    #[serde(default = "default_true")]
    pub run_validation: bool,

    #[serde(default = "default_true")]
    pub trigger_workflow: bool,
}

impl IngestRequest {
    /// Request for `table` with validation and trigger enabled
    pub fn new(source_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            destination_prefix: None,
            limit: None,
            run_validation: true,
            trigger_workflow: true,
        }
    }

    /// Check everything that can be checked without I/O
    pub fn validate(&self) -> Result<()> {
        validate_table_identifier(&self.source_table)?;
        validate_limit(self.limit)?;

        if let Some(prefix) = &self.destination_prefix {
            if prefix.chars().count() > MAX_PREFIX_LEN {
                return Err(PipelineError::invalid_argument(format!(
                    "destination prefix longer than {} characters",
                    MAX_PREFIX_LEN
                )));
            }
        }

        if self.resolved_prefix().contains("..") {
            return Err(PipelineError::invalid_argument(
                "destination prefix cannot contain path traversal sequences",
            ));
        }
        Ok(())
    }

    /// Prefix with surrounding `/` and whitespace removed; blank falls back
    /// to the table name
    pub fn resolved_prefix(&self) -> String {
        let trimmed = self
            .destination_prefix
            .as_deref()
            .map(|p| p.trim_matches(|c: char| c == '/' || c.is_whitespace()));
        match trimmed {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => self.source_table.clone(),
        }
    }
}

/// `{prefix}/{yyyyMMddHHmmss}.json` in UTC
pub fn object_key(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}/{}.json", prefix, at.format("%Y%m%d%H%M%S"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Read,
    Serialize,
    Upload,
    Validate,
    Trigger,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::Serialize => "serialize",
            Stage::Upload => "upload",
            Stage::Validate => "validate",
            Stage::Trigger => "trigger",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A post-upload stage that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: String,
    pub cancelled: bool,
}

impl StageFailure {
    fn from_error(stage: Stage, error: &PipelineError) -> Self {
        Self {
            stage,
            error: error.to_string(),
            cancelled: matches!(error, PipelineError::Cancelled(_)),
        }
    }

    fn cancelled(stage: Stage) -> Self {
        Self::from_error(stage, &PipelineError::cancelled(stage.as_str()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub object_key: String,
    pub row_count: usize,
    pub run_id: Option<String>,
    pub validation_report: Option<String>,
    pub failures: Vec<StageFailure>,
}

impl IngestResult {
    /// True when every requested stage completed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct BatchOrchestrator {
    reader: Arc<dyn SourceReader>,
    storage: Arc<ObjectStoreAdapter>,
    validator: Arc<dyn DataValidator>,
    workflow: Arc<dyn WorkflowTrigger>,
    suite: String,
}

impl BatchOrchestrator {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        storage: Arc<ObjectStoreAdapter>,
        validator: Arc<dyn DataValidator>,
        workflow: Arc<dyn WorkflowTrigger>,
    ) -> Self {
        Self {
            reader,
            storage,
            validator,
            workflow,
            suite: DEFAULT_VALIDATION_SUITE.to_string(),
        }
    }

    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = suite.into();
        self
    }

    /// Run one ingest under a fresh correlation id
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` before any external call
    /// - the reader's or adapter's error if read or upload fails
    /// - `Cancelled` if `cancel` fires before the upload completes
    pub async fn ingest(&self, request: &IngestRequest, cancel: &CancellationToken) -> Result<IngestResult> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "ingest",
            %correlation_id,
            table = %request.source_table
        );
        self.run(request, cancel).instrument(span).await
    }

    async fn run(&self, request: &IngestRequest, cancel: &CancellationToken) -> Result<IngestResult> {
        request.validate()?;

        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::cancelled(Stage::Read.as_str())),
            rows = self.reader.read_table(&request.source_table, request.limit) => rows?,
        };
        let row_count = rows.len();
        info!(row_count, "rows read");

        let body = serde_json::to_vec(&rows)
            .map_err(|e| PipelineError::StorageWriteFailed(format!("serialize rows: {}", e)))?;
        drop(rows);

        let key = object_key(&request.resolved_prefix(), Utc::now());
        let receipt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::cancelled(Stage::Upload.as_str())),
            receipt = self.storage.upload(BucketClass::Raw, &key, body) => receipt?,
        };
        info!(
            bucket = %receipt.bucket,
            object_key = %receipt.key,
            size_bytes = receipt.size_bytes,
            "snapshot stored"
        );

        let mut result = IngestResult {
            object_key: receipt.key,
            row_count,
            run_id: None,
            validation_report: None,
            failures: Vec::new(),
        };

        if request.run_validation {
            if cancel.is_cancelled() {
                result.failures.push(StageFailure::cancelled(Stage::Validate));
            } else {
                match self.validator.validate(&self.suite, cancel).await {
                    Ok(report) => result.validation_report = Some(report),
                    Err(e) => {
                        warn!(error = %e, "validation stage failed");
                        result.failures.push(StageFailure::from_error(Stage::Validate, &e));
                    }
                }
            }
        }

        if request.trigger_workflow {
            let triggered = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::cancelled(Stage::Trigger.as_str())),
                run = self.workflow.trigger_run(JobKind::Batch) => run,
            };
            match triggered {
                Ok(run_id) => result.run_id = Some(run_id),
                Err(e) => {
                    warn!(error = %e, "workflow trigger stage failed");
                    result.failures.push(StageFailure::from_error(Stage::Trigger, &e));
                }
            }
        }

        info!(
            object_key = %result.object_key,
            row_count,
            run_id = result.run_id.as_deref().unwrap_or(""),
            failures = result.failures.len(),
            "batch ingest completed"
        );
        Ok(result)
    }
}
