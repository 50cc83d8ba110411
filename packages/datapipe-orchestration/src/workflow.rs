//! Workflow trigger client
//!
//! Run ids are generated client-side as `{prefix}_{yyyyMMddHHmmss}` (UTC), so a
//! retried trigger re-sends the same id. Ids are second-granular: two
//! triggers of the same job within one second collide.

use crate::config::OrchestratorConfig;
use crate::error::{PipelineError, Result};
use crate::health::HealthEntry;
use crate::http::{build_client, send, send_with_retry, HttpFailure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datapipe_storage::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Which orchestrator job a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Batch,
    Streaming,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Batch => "batch",
            JobKind::Streaming => "streaming",
        }
    }

    pub fn run_id_prefix(&self) -> &'static str {
        match self {
            JobKind::Batch => "batch",
            JobKind::Streaming => "stream",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "batch" => Ok(JobKind::Batch),
            "streaming" | "stream" => Ok(JobKind::Streaming),
            _ => Err(PipelineError::invalid_argument(format!(
                "unknown job kind '{}', expected batch or streaming",
                s
            ))),
        }
    }
}

pub fn run_id(kind: JobKind, at: DateTime<Utc>) -> String {
    format!("{}_{}", kind.run_id_prefix(), at.format("%Y%m%d%H%M%S"))
}

#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    /// Start a run and return its id; does not wait for completion
    async fn trigger_run(&self, kind: JobKind) -> Result<String>;

    /// Current state of a run as reported by the orchestrator
    async fn get_status(&self, kind: JobKind, run_id: &str) -> Result<Value>;
}

/// Orchestrator REST client with basic auth
pub struct WorkflowClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    batch_job_id: String,
    streaming_job_id: String,
    retry: RetryPolicy,
}

impl WorkflowClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self> {
        let http = build_client(config.request_timeout())
            .map_err(|e| PipelineError::unavailable("orchestrator", format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            batch_job_id: config.batch_job_id.clone(),
            streaming_job_id: config.streaming_job_id.clone(),
            retry: RetryPolicy::exponential(config.max_retries + 1, config.retry_base_delay()),
        })
    }

    pub fn job_id(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Batch => &self.batch_job_id,
            JobKind::Streaming => &self.streaming_job_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Orchestrator self-report: Healthy only if every component says so
    pub async fn health(&self) -> Result<HealthEntry> {
        let request = self
            .http
            .get(self.url("/health"))
            .basic_auth(&self.username, Some(&self.password));

        let response = match send(request).await {
            Ok(response) => response,
            Err(HttpFailure::Status { status, .. }) => {
                return Ok(HealthEntry::degraded(format!(
                    "orchestrator responded with {}",
                    status
                )));
            }
            Err(e) => return Err(PipelineError::unavailable("orchestrator", e)),
        };

        let report: OrchestratorHealth = response
            .json()
            .await
            .map_err(|e| PipelineError::unavailable("orchestrator", format!("bad health payload: {}", e)))?;

        if report.all_healthy() {
            Ok(HealthEntry::healthy())
        } else {
            Ok(HealthEntry::degraded(format!(
                "orchestrator status: meta={}, scheduler={}, webserver={}",
                report.metadatabase.status, report.scheduler.status, report.webserver.status
            )))
        }
    }
}

#[async_trait]
impl WorkflowTrigger for WorkflowClient {
    async fn trigger_run(&self, kind: JobKind) -> Result<String> {
        let job = self.job_id(kind);
        let run_id = run_id(kind, Utc::now());
        let url = self.url(&format!("/dags/{}/dagRuns", job));
        let body = json!({ "dag_run_id": run_id });

        send_with_retry(&self.retry, "workflow trigger", || {
            self.http
                .post(&url)
                .basic_auth(&self.username, Some(&self.password))
                .json(&body)
        })
        .await
        .map_err(|e| PipelineError::WorkflowTriggerFailed {
            job: job.to_string(),
            status: e.last.status(),
            message: e.to_string(),
        })?;

        info!(job, run_id = %run_id, kind = %kind, "workflow run triggered");
        Ok(run_id)
    }

    async fn get_status(&self, kind: JobKind, run_id: &str) -> Result<Value> {
        let job = self.job_id(kind);
        let url = self.url(&format!("/dags/{}/dagRuns/{}", job, run_id));

        let query_failed = |status: Option<u16>, message: String| PipelineError::WorkflowQueryFailed {
            run_id: run_id.to_string(),
            status,
            message,
        };

        let response = send_with_retry(&self.retry, "workflow status", || {
            self.http
                .get(&url)
                .basic_auth(&self.username, Some(&self.password))
        })
        .await
        .map_err(|e| query_failed(e.last.status(), e.to_string()))?;

        let status: Value = response
            .json()
            .await
            .map_err(|e| query_failed(None, format!("bad status payload: {}", e)))?;

        debug!(job, run_id, "fetched workflow run status");
        Ok(status)
    }
}

#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
}

impl ComponentStatus {
    fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

#[derive(Debug, Deserialize)]
struct OrchestratorHealth {
    metadatabase: ComponentStatus,
    scheduler: ComponentStatus,
    webserver: ComponentStatus,
}

impl OrchestratorHealth {
    fn all_healthy(&self) -> bool {
        self.metadatabase.is_healthy() && self.scheduler.is_healthy() && self.webserver.is_healthy()
    }
}
