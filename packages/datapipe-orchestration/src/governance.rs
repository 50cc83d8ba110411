//! Governance lineage and model-tracking clients

use crate::config::{GovernanceConfig, ModelTrackingConfig};
use crate::error::{PipelineError, Result};
use crate::health::HealthEntry;
use crate::http::{build_client, send, send_with_retry, HttpFailure};
use datapipe_storage::RetryPolicy;
use serde_json::{json, Value};
use tracing::info;

/// Registers dataset lineage with the governance service
pub struct LineageClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl LineageClient {
    pub fn new(config: &GovernanceConfig) -> Result<Self> {
        let http = build_client(config.request_timeout())
            .map_err(|e| PipelineError::unavailable("governance", format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// POST the lineage document and return the service's response body
    pub async fn register_lineage(&self, lineage: &Value) -> Result<String> {
        let request = self
            .http
            .post(format!("{}/lineage", self.endpoint))
            .basic_auth(&self.username, Some(&self.password))
            .json(lineage);

        let response = send(request)
            .await
            .map_err(|e| PipelineError::unavailable("governance", e))?;
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::unavailable("governance", e))?;

        info!(bytes = body.len(), "lineage registered");
        Ok(body)
    }
}

pub struct ModelTrackingClient {
    http: reqwest::Client,
    tracking_uri: String,
    retry: RetryPolicy,
}

impl ModelTrackingClient {
    pub fn new(config: &ModelTrackingConfig) -> Result<Self> {
        let http = build_client(config.request_timeout()).map_err(|e| {
            PipelineError::unavailable("model_tracking", format!("HTTP client: {}", e))
        })?;
        Ok(Self {
            http,
            tracking_uri: config.tracking_uri.trim_end_matches('/').to_string(),
            retry: RetryPolicy::exponential(config.max_retries + 1, config.retry_base_delay()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.tracking_uri, path)
    }

    /// Create a run under `experiment_id`; transient failures are retried
    pub async fn create_run(&self, experiment_id: &str, run_name: &str) -> Result<Value> {
        let url = self.url("/api/2.0/mlflow/runs/create");
        let body = json!({ "experiment_id": experiment_id, "run_name": run_name });

        let response = send_with_retry(&self.retry, "model tracking run create", || {
            self.http.post(&url).json(&body)
        })
        .await
        .map_err(|e| PipelineError::unavailable("model_tracking", e))?;

        let run: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::unavailable("model_tracking", format!("bad run payload: {}", e)))?;

        info!(experiment_id, run_name, "model tracking run created");
        Ok(run)
    }

    pub async fn health(&self) -> Result<HealthEntry> {
        let request = self
            .http
            .get(self.url("/api/2.0/mlflow/experiments/list"))
            .query(&[("max_results", "1")]);

        match send(request).await {
            Ok(_) => Ok(HealthEntry::healthy()),
            Err(HttpFailure::Status { status, .. }) => Ok(HealthEntry::degraded(format!(
                "tracking server responded with {}",
                status
            ))),
            Err(e) => Err(PipelineError::unavailable("model_tracking", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use crate::testing::FakeHttpServer;

    fn governance(endpoint: &str) -> GovernanceConfig {
        GovernanceConfig {
            endpoint: format!("{}/", endpoint),
            username: "steward".into(),
            password: "secret".into(),
            request_timeout_secs: 5,
        }
    }

    fn tracking(uri: &str) -> ModelTrackingConfig {
        ModelTrackingConfig {
            tracking_uri: uri.to_string(),
            request_timeout_secs: 5,
            max_retries: 2,
            retry_base_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_register_lineage_posts_document() {
        let server = FakeHttpServer::start(vec![(201, r#"{"id":"lin-1"}"#)]).await;
        let client = LineageClient::new(&governance(&server.base_url)).unwrap();

        let lineage = json!({ "source": "orders", "target": "raw/orders" });
        let body = client.register_lineage(&lineage).await.unwrap();
        assert_eq!(body, r#"{"id":"lin-1"}"#);

        let request = &server.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/lineage");
        assert_eq!(request.header("authorization"), Some("Basic c3Rld2FyZDpzZWNyZXQ="));
        let sent: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(sent, lineage);
    }

    #[tokio::test]
    async fn test_lineage_failure_is_dependency_error() {
        let server = FakeHttpServer::start(vec![(500, "")]).await;
        let client = LineageClient::new(&governance(&server.base_url)).unwrap();

        let err = client.register_lineage(&json!({})).await.unwrap_err();
        assert_eq!(err.dependency(), Some("governance"));
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_create_run_retries_transient() {
        let server =
            FakeHttpServer::start(vec![(503, ""), (200, r#"{"run":{"info":{"run_id":"r1"}}}"#)]).await;
        let client = ModelTrackingClient::new(&tracking(&server.base_url)).unwrap();

        let run = client.create_run("7", "nightly").await.unwrap();
        assert_eq!(run["run"]["info"]["run_id"], "r1");
        assert_eq!(server.request_count(), 2);

        let request = &server.requests()[1];
        assert_eq!(request.path, "/api/2.0/mlflow/runs/create");
        let sent: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(sent, json!({ "experiment_id": "7", "run_name": "nightly" }));
    }

    #[tokio::test]
    async fn test_create_run_rejected() {
        let server = FakeHttpServer::start(vec![(400, r#"{"error_code":"INVALID_PARAMETER_VALUE"}"#)]).await;
        let client = ModelTrackingClient::new(&tracking(&server.base_url)).unwrap();

        let err = client.create_run("nope", "x").await.unwrap_err();
        assert_eq!(err.dependency(), Some("model_tracking"));
        assert!(err.to_string().contains("INVALID_PARAMETER_VALUE"));
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_health_probe() {
        let server = FakeHttpServer::start(vec![(200, r#"{"experiments":[]}"#), (503, "")]).await;
        let client = ModelTrackingClient::new(&tracking(&server.base_url)).unwrap();

        assert_eq!(client.health().await.unwrap().status, HealthStatus::Healthy);
        assert_eq!(client.health().await.unwrap().status, HealthStatus::Degraded);
        assert_eq!(
            server.requests()[0].path,
            "/api/2.0/mlflow/experiments/list?max_results=1"
        );
    }
}
