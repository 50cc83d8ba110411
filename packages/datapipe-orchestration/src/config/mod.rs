//! Gateway configuration
//!
//! Loaded from a YAML v1 document, one section per external collaborator.
//! Secrets may be supplied through the environment instead of the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `DATAPIPE_OBJECT_STORE_SECRET_KEY` | `object_store.secret_key` |
//! | `DATAPIPE_ORCHESTRATOR_PASSWORD` | `orchestrator.password` |
//! | `DATAPIPE_GOVERNANCE_PASSWORD` | `governance.password` |

pub mod error;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use validation::Validatable;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validation::{check_range, check_required};

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

pub const ENV_OBJECT_STORE_SECRET_KEY: &str = "DATAPIPE_OBJECT_STORE_SECRET_KEY";
pub const ENV_ORCHESTRATOR_PASSWORD: &str = "DATAPIPE_ORCHESTRATOR_PASSWORD";
pub const ENV_GOVERNANCE_PASSWORD: &str = "DATAPIPE_GOVERNANCE_PASSWORD";

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatapipeConfig {
    /// Schema version (always 1 for v1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    pub source: SourceConfig,
    pub object_store: ObjectStoreConfig,
    pub broker: BrokerConfig,
    pub orchestrator: OrchestratorConfig,
    pub validator: ValidatorConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tracking: Option<ModelTrackingConfig>,

    #[serde(default)]
    pub health: HealthConfig,
}

impl DatapipeConfig {
    /// Parse, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut config = Self::from_yaml(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML v1 file without validating ranges
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: DatapipeConfig = serde_yaml::from_str(content)?;

        match config.version {
            None => return Err(ConfigError::MissingVersion),
            Some(found) if !SUPPORTED_VERSIONS.contains(&found) => {
                return Err(ConfigError::UnsupportedVersion {
                    found,
                    supported: SUPPORTED_VERSIONS.to_vec(),
                });
            }
            Some(_) => {}
        }

        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply secret overrides from `lookup`; blank values are ignored
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = lookup(ENV_OBJECT_STORE_SECRET_KEY) {
            self.object_store.secret_key = secret;
        }
        if let Some(password) = lookup(ENV_ORCHESTRATOR_PASSWORD) {
            self.orchestrator.password = password;
        }
        if let (Some(governance), Some(password)) =
            (self.governance.as_mut(), lookup(ENV_GOVERNANCE_PASSWORD))
        {
            governance.password = password;
        }
    }
}

impl Validatable for DatapipeConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.source.validate()?;
        self.object_store.validate()?;
        self.broker.validate()?;
        self.orchestrator.validate()?;
        self.validator.validate()?;
        self.governance.validate()?;
        self.model_tracking.validate()?;
        self.health.validate()?;
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "datapipe"
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════

/// Relational source store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// MySQL DSN the ingest rows are read from
    pub mysql_url: String,

    /// Postgres DSN, probed for reachability only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_url: Option<String>,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl SourceConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Validatable for SourceConfig {
    fn validate(&self) -> ConfigResult<()> {
        let s = self.config_name();
        check_required(s, "mysql_url", &self.mysql_url, "Set a mysql:// connection string")?;
        if let Some(url) = &self.postgres_url {
            check_required(s, "postgres_url", url, "Remove the key or set a postgres:// connection string")?;
        }
        check_range(
            s,
            "command_timeout_secs",
            self.command_timeout_secs,
            5,
            300,
            "Source reads must be bounded but allowed to finish",
        )?;
        check_range(
            s,
            "max_connections",
            self.max_connections,
            1,
            100,
            "Pool size must be positive",
        )
    }

    fn config_name(&self) -> &'static str {
        "source"
    }
}

/// S3-compatible object store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectStoreConfig {
    /// `host:port` or full URL
    pub endpoint: String,
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket_raw: String,
    pub bucket_processed: String,

    #[serde(default = "default_max_upload_retries")]
    pub max_upload_retries: u32,

    #[serde(default = "default_upload_retry_base_delay_ms")]
    pub upload_retry_base_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ObjectStoreConfig {
    pub fn upload_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.upload_retry_base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Validatable for ObjectStoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        let s = self.config_name();
        check_required(s, "endpoint", &self.endpoint, "Set host:port of the object store")?;
        check_required(s, "access_key", &self.access_key, "Set the access key")?;
        check_required(
            s,
            "secret_key",
            &self.secret_key,
            "Set the secret key or DATAPIPE_OBJECT_STORE_SECRET_KEY",
        )?;
        check_required(s, "bucket_raw", &self.bucket_raw, "Name the raw snapshot bucket")?;
        check_required(
            s,
            "bucket_processed",
            &self.bucket_processed,
            "Name the processed output bucket",
        )?;
        check_range(
            s,
            "max_upload_retries",
            self.max_upload_retries,
            1,
            4,
            "Uploads are retried a handful of times at most",
        )?;
        check_range(
            s,
            "upload_retry_base_delay_ms",
            self.upload_retry_base_delay_ms,
            1,
            10_000,
            "Delay grows linearly per attempt",
        )?;
        check_range(
            s,
            "request_timeout_secs",
            self.request_timeout_secs,
            5,
            300,
            "Object store requests must be bounded",
        )
    }

    fn config_name(&self) -> &'static str {
        "object_store"
    }
}

/// Message broker producer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub bootstrap_servers: String,
    pub topic: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    #[serde(default = "default_flush_grace_secs")]
    pub flush_grace_secs: u64,

    #[serde(default = "default_send_max_retries")]
    pub send_max_retries: u32,
}

impl BrokerConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_secs(self.flush_grace_secs)
    }
}

impl Validatable for BrokerConfig {
    fn validate(&self) -> ConfigResult<()> {
        let s = self.config_name();
        check_required(s, "bootstrap_servers", &self.bootstrap_servers, "List at least one broker")?;
        check_required(s, "topic", &self.topic, "Name the topic messages are published to")?;
        check_required(s, "client_id", &self.client_id, "Client id identifies this producer")?;
        check_range(
            s,
            "message_timeout_ms",
            self.message_timeout_ms,
            500,
            30_000,
            "Delivery must be acknowledged within a bounded time",
        )?;
        check_range(
            s,
            "flush_grace_secs",
            self.flush_grace_secs,
            1,
            10,
            "Shutdown flush must not block indefinitely",
        )?;
        check_range(
            s,
            "send_max_retries",
            self.send_max_retries,
            0,
            10,
            "Producer retries are bounded",
        )
    }

    fn config_name(&self) -> &'static str {
        "broker"
    }
}

/// Workflow orchestrator REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// API root, e.g. `http://airflow:8080/api/v1`
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_batch_job_id")]
    pub batch_job_id: String,

    #[serde(default = "default_streaming_job_id")]
    pub streaming_job_id: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt, transient failures only
    #[serde(default = "default_http_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_http_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Validatable for OrchestratorConfig {
    fn validate(&self) -> ConfigResult<()> {
        let s = self.config_name();
        check_required(s, "base_url", &self.base_url, "Set the orchestrator API root")?;
        check_required(s, "username", &self.username, "Basic auth user")?;
        check_required(
            s,
            "password",
            &self.password,
            "Set the password or DATAPIPE_ORCHESTRATOR_PASSWORD",
        )?;
        check_required(s, "batch_job_id", &self.batch_job_id, "Job triggered after batch ingest")?;
        check_required(
            s,
            "streaming_job_id",
            &self.streaming_job_id,
            "Job started for stream monitoring",
        )?;
        check_range(
            s,
            "request_timeout_secs",
            self.request_timeout_secs,
            5,
            300,
            "Orchestrator requests must be bounded",
        )?;
        check_range(s, "max_retries", self.max_retries, 0, 10, "Retry budget is bounded")?;
        check_range(
            s,
            "retry_base_delay_ms",
            self.retry_base_delay_ms,
            1,
            60_000,
            "Delay doubles per attempt",
        )
    }

    fn config_name(&self) -> &'static str {
        "orchestrator"
    }
}

/// External data-quality validator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    pub executable: PathBuf,

    /// Arguments placed before the suite name
    #[serde(default = "default_validator_args")]
    pub args: Vec<String>,

    #[serde(default = "default_validation_suite")]
    pub suite: String,

    #[serde(default = "default_validator_timeout_secs")]
    pub timeout_secs: u64,
}

impl ValidatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Validatable for ValidatorConfig {
    fn validate(&self) -> ConfigResult<()> {
        let s = self.config_name();
        if self.executable.as_os_str().is_empty() {
            return Err(ConfigError::required(
                format!("{}.executable", s),
                "Point at the validator CLI",
            ));
        }
        check_required(s, "suite", &self.suite, "Name the expectation suite to run")?;
        check_range(
            s,
            "timeout_secs",
            self.timeout_secs,
            5,
            1800,
            "Validation runs are killed after this long",
        )
    }

    fn config_name(&self) -> &'static str {
        "validator"
    }
}

/// Lineage / governance service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceConfig {
    pub endpoint: String,
    pub username: String,
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl GovernanceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Validatable for GovernanceConfig {
    fn validate(&self) -> ConfigResult<()> {
        let s = self.config_name();
        check_required(s, "endpoint", &self.endpoint, "Set the governance API root")?;
        check_required(s, "username", &self.username, "Basic auth user")?;
        check_required(
            s,
            "password",
            &self.password,
            "Set the password or DATAPIPE_GOVERNANCE_PASSWORD",
        )?;
        check_range(
            s,
            "request_timeout_secs",
            self.request_timeout_secs,
            5,
            300,
            "Governance requests must be bounded",
        )
    }

    fn config_name(&self) -> &'static str {
        "governance"
    }
}

/// Model-tracking service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelTrackingConfig {
    pub tracking_uri: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_http_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_http_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl ModelTrackingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Validatable for ModelTrackingConfig {
    fn validate(&self) -> ConfigResult<()> {
        let s = self.config_name();
        check_required(s, "tracking_uri", &self.tracking_uri, "Set the tracking server URI")?;
        check_range(
            s,
            "request_timeout_secs",
            self.request_timeout_secs,
            5,
            300,
            "Tracking requests must be bounded",
        )?;
        check_range(s, "max_retries", self.max_retries, 0, 10, "Retry budget is bounded")?;
        check_range(
            s,
            "retry_base_delay_ms",
            self.retry_base_delay_ms,
            1,
            60_000,
            "Delay doubles per attempt",
        )
    }

    fn config_name(&self) -> &'static str {
        "model_tracking"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Validatable for HealthConfig {
    fn validate(&self) -> ConfigResult<()> {
        check_range(
            self.config_name(),
            "probe_timeout_secs",
            self.probe_timeout_secs,
            1,
            60,
            "Probes must answer quickly",
        )
    }

    fn config_name(&self) -> &'static str {
        "health"
    }
}

// Serde defaults

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_upload_retries() -> u32 {
    2
}

fn default_upload_retry_base_delay_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_client_id() -> String {
    "data-pipeline-api".to_string()
}

fn default_message_timeout_ms() -> u64 {
    5000
}

fn default_flush_grace_secs() -> u64 {
    2
}

fn default_send_max_retries() -> u32 {
    3
}

fn default_batch_job_id() -> String {
    "batch_ingestion_dag".to_string()
}

fn default_streaming_job_id() -> String {
    "streaming_monitoring_dag".to_string()
}

fn default_http_max_retries() -> u32 {
    3
}

fn default_http_retry_base_delay_ms() -> u64 {
    1000
}

fn default_validator_args() -> Vec<String> {
    vec!["checkpoint".to_string(), "run".to_string()]
}

fn default_validation_suite() -> String {
    "great_expectations/expectations".to_string()
}

fn default_validator_timeout_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    5
}
