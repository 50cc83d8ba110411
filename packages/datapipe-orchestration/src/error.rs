use crate::config::ConfigError;
use datapipe_storage::{ErrorKind, StorageError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{dependency} unavailable: {message}")]
    DependencyUnavailable { dependency: String, message: String },

    #[error("Rows of '{table}' could not be decoded: {message}")]
    SourceData { table: String, message: String },

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("Workflow trigger failed for job '{job}': {message}")]
    WorkflowTriggerFailed {
        job: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Workflow query failed for run '{run_id}': {message}")]
    WorkflowQueryFailed {
        run_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Publish not acknowledged within {0:?}")]
    PublishTimeout(Duration),

    #[error("Validation did not finish within {0:?}")]
    ValidationTimeout(Duration),

    #[error("Validation failed (exit code {exit_code:?}): {stderr}")]
    ValidationFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Validator executable not found at {}", .0.display())]
    ValidatorNotFound(PathBuf),

    #[error("Cancelled during {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn invalid_argument<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    pub fn unavailable(dependency: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::DependencyUnavailable {
            dependency: dependency.into(),
            message: message.to_string(),
        }
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled(stage.into())
    }

    /// Name of the external collaborator the error came from, if any
    pub fn dependency(&self) -> Option<&str> {
        match self {
            PipelineError::DependencyUnavailable { dependency, .. } => Some(dependency.as_str()),
            PipelineError::SourceData { .. } => Some("source"),
            PipelineError::StorageWriteFailed(_) => Some("object_store"),
            PipelineError::WorkflowTriggerFailed { .. }
            | PipelineError::WorkflowQueryFailed { .. } => Some("orchestrator"),
            PipelineError::PublishFailed(_) | PipelineError::PublishTimeout(_) => Some("broker"),
            PipelineError::ValidationTimeout(_)
            | PipelineError::ValidationFailed { .. }
            | PipelineError::ValidatorNotFound(_) => Some("validator"),
            PipelineError::InvalidArgument(_)
            | PipelineError::Cancelled(_)
            | PipelineError::Config(_) => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::InvalidArgument(_)
            | PipelineError::SourceData { .. }
            | PipelineError::ValidationFailed { .. }
            | PipelineError::Config(_) => ErrorCategory::Permanent,
            PipelineError::DependencyUnavailable { .. }
            | PipelineError::PublishTimeout(_)
            | PipelineError::ValidationTimeout(_)
            | PipelineError::Cancelled(_) => ErrorCategory::Transient,
            PipelineError::WorkflowTriggerFailed { status, .. }
            | PipelineError::WorkflowQueryFailed { status, .. } => match status {
                Some(code) if (400..500).contains(code) && *code != 408 && *code != 429 => {
                    ErrorCategory::Permanent
                }
                _ => ErrorCategory::Infrastructure,
            },
            PipelineError::StorageWriteFailed(_)
            | PipelineError::PublishFailed(_)
            | PipelineError::ValidatorNotFound(_) => ErrorCategory::Infrastructure,
        }
    }

    /// True only for errors caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::InvalidArgument(_))
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        match e.kind {
            ErrorKind::InvalidArgument => PipelineError::InvalidArgument(e.message),
            ErrorKind::WriteFailed => PipelineError::StorageWriteFailed(e.message),
            _ => PipelineError::unavailable("object_store", e),
        }
    }
}

/// Error category for retry and alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - a later attempt may succeed (e.g., timeout, connection)
    Transient,
    /// Permanent error - don't retry (e.g., invalid input, failed validation)
    Permanent,
    /// Infrastructure error - alert ops (e.g., retries exhausted, missing tool)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(PipelineError::invalid_argument(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_roundtrip() {
        for category in &[
            ErrorCategory::Transient,
            ErrorCategory::Permanent,
            ErrorCategory::Infrastructure,
        ] {
            let s = category.as_str();
            let parsed: ErrorCategory = s.parse().unwrap();
            assert_eq!(*category, parsed);
        }
    }

    #[test]
    fn test_error_category_invalid() {
        assert!("invalid".parse::<ErrorCategory>().is_err());
    }

    #[test]
    fn test_only_invalid_argument_is_client_error() {
        assert!(PipelineError::invalid_argument("bad table").is_client_error());
        assert!(!PipelineError::unavailable("source", "refused").is_client_error());
        assert!(!PipelineError::cancelled("upload").is_client_error());
    }

    #[test]
    fn test_dependency_names() {
        assert_eq!(
            PipelineError::unavailable("source", "refused").dependency(),
            Some("source")
        );
        assert_eq!(
            PipelineError::StorageWriteFailed("x".into()).dependency(),
            Some("object_store")
        );
        assert_eq!(
            PipelineError::PublishTimeout(Duration::from_secs(5)).dependency(),
            Some("broker")
        );
        assert_eq!(PipelineError::invalid_argument("x").dependency(), None);
    }

    #[test]
    fn test_workflow_status_classification() {
        let bad_request = PipelineError::WorkflowTriggerFailed {
            job: "batch_ingestion_dag".into(),
            status: Some(400),
            message: "bad".into(),
        };
        assert_eq!(bad_request.category(), ErrorCategory::Permanent);

        let server_error = PipelineError::WorkflowTriggerFailed {
            job: "batch_ingestion_dag".into(),
            status: Some(503),
            message: "down".into(),
        };
        assert_eq!(server_error.category(), ErrorCategory::Infrastructure);
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: PipelineError = StorageError::write_failed("gave up").into();
        assert!(matches!(err, PipelineError::StorageWriteFailed(_)));

        let err: PipelineError = StorageError::unavailable("refused").into();
        assert_eq!(err.dependency(), Some("object_store"));
        assert_eq!(err.category(), ErrorCategory::Transient);

        let err: PipelineError = StorageError::invalid_argument("empty key").into();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_source_data_is_permanent() {
        let err = PipelineError::SourceData {
            table: "orders".into(),
            message: "TIME out of range".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert_eq!(err.dependency(), Some("source"));
        assert!(!err.is_client_error());
    }
}
