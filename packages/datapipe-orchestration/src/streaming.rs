//! Streaming pipeline: publish envelopes and start the monitoring job

use crate::error::{PipelineError, Result};
use crate::publisher::{MessagePublisher, ShutdownReport};
use crate::workflow::{JobKind, WorkflowTrigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub partition: i32,

    #[serde(default)]
    pub payload: Value,
}

impl StreamRequest {
    pub fn new(partition: i32, payload: Value) -> Self {
        Self { partition, payload }
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition < 0 {
            return Err(PipelineError::invalid_argument(format!(
                "partition must be non-negative, got {}",
                self.partition
            )));
        }
        Ok(())
    }
}

/// What actually goes on the wire
#[derive(Debug, Serialize)]
pub struct StreamEnvelope<'a> {
    pub ts: DateTime<Utc>,
    pub partition: i32,
    pub payload: &'a Value,
}

/// Response to a monitoring trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringRun {
    pub run_id: String,
    pub status: String,
}

pub struct StreamingOrchestrator {
    publisher: MessagePublisher,
    workflow: Arc<dyn WorkflowTrigger>,
}

impl StreamingOrchestrator {
    pub fn new(publisher: MessagePublisher, workflow: Arc<dyn WorkflowTrigger>) -> Self {
        Self {
            publisher,
            workflow,
        }
    }

    /// Wrap the payload with a server timestamp and publish it
    pub async fn publish(&self, request: &StreamRequest, cancel: &CancellationToken) -> Result<()> {
        request.validate()?;

        let envelope = StreamEnvelope {
            ts: Utc::now(),
            partition: request.partition,
            payload: &request.payload,
        };
        let message = serde_json::to_string(&envelope)
            .map_err(|e| PipelineError::invalid_argument(format!("payload not serializable: {}", e)))?;

        self.publisher.publish(&message, cancel).await?;
        info!(partition = request.partition, topic = %self.publisher.topic(), "message produced");
        Ok(())
    }

    pub async fn start_monitoring(&self) -> Result<MonitoringRun> {
        let run_id = self.workflow.trigger_run(JobKind::Streaming).await?;
        info!(run_id = %run_id, "streaming monitoring run triggered");
        Ok(MonitoringRun {
            run_id,
            status: "scheduled".to_string(),
        })
    }

    pub async fn monitoring_status(&self, run_id: &str) -> Result<Value> {
        self.workflow.get_status(JobKind::Streaming, run_id).await
    }

    /// Flush and close the publisher
    pub async fn shutdown(self) -> ShutdownReport {
        self.publisher.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MessageProducer;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct CapturingProducer {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageProducer for CapturingProducer {
        async fn send(&self, _topic: &str, payload: &str) -> Result<()> {
            self.messages.lock().push(payload.to_string());
            Ok(())
        }

        async fn flush(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn in_flight(&self) -> usize {
            0
        }

        async fn topic_available(&self, _topic: &str, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }
    }

    struct FixedTrigger;

    #[async_trait]
    impl WorkflowTrigger for FixedTrigger {
        async fn trigger_run(&self, kind: JobKind) -> Result<String> {
            Ok(format!("{}_20240101000000", kind.run_id_prefix()))
        }

        async fn get_status(&self, kind: JobKind, run_id: &str) -> Result<Value> {
            Ok(json!({ "job": kind.as_str(), "dag_run_id": run_id, "state": "running" }))
        }
    }

    fn orchestrator(producer: Arc<CapturingProducer>) -> StreamingOrchestrator {
        let publisher = MessagePublisher::new(
            producer,
            "events",
            Duration::from_millis(5000),
            Duration::from_secs(2),
        );
        StreamingOrchestrator::new(publisher, Arc::new(FixedTrigger))
    }

    #[tokio::test]
    async fn test_publish_wraps_payload() {
        let producer = Arc::new(CapturingProducer::default());
        let streaming = orchestrator(producer.clone());

        streaming
            .publish(&StreamRequest::new(3, json!({"a": 1})), &CancellationToken::new())
            .await
            .unwrap();

        let messages = producer.messages.lock();
        assert_eq!(messages.len(), 1);
        let envelope: Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(envelope["partition"], 3);
        assert_eq!(envelope["payload"], json!({"a": 1}));
        assert!(envelope["ts"].as_str().unwrap().parse::<DateTime<Utc>>().is_ok());
    }

    #[tokio::test]
    async fn test_negative_partition_rejected() {
        let producer = Arc::new(CapturingProducer::default());
        let streaming = orchestrator(producer.clone());

        let err = streaming
            .publish(&StreamRequest::new(-1, Value::Null), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(producer.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_monitoring_and_status() {
        let streaming = orchestrator(Arc::new(CapturingProducer::default()));

        let run = streaming.start_monitoring().await.unwrap();
        assert_eq!(
            run,
            MonitoringRun {
                run_id: "stream_20240101000000".into(),
                status: "scheduled".into()
            }
        );

        let status = streaming.monitoring_status(&run.run_id).await.unwrap();
        assert_eq!(status["job"], "streaming");
        assert_eq!(status["dag_run_id"], run.run_id.as_str());

        assert!(streaming.shutdown().await.flushed);
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let request: StreamRequest = serde_json::from_str(r#"{"partition":2}"#).unwrap();
        assert_eq!(request.partition, 2);
        assert!(request.payload.is_null());
    }
}
