//! Kafka-backed [`MessageProducer`]
//!
//! librdkafka's flush and metadata calls block, so they run on the blocking pool.

use crate::config::BrokerConfig;
use crate::error::{PipelineError, Result};
use crate::publisher::MessageProducer;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct KafkaProducer {
    inner: FutureProducer,
    message_timeout: Duration,
}

impl KafkaProducer {
    /// Build a producer with acks from all replicas and idempotent retries
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.send.max.retries", config.send_max_retries.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| PipelineError::unavailable("broker", format!("producer setup: {}", e)))?;

        Ok(Self {
            inner,
            message_timeout: config.message_timeout(),
        })
    }
}

#[async_trait]
impl MessageProducer for KafkaProducer {
    async fn send(&self, topic: &str, payload: &str) -> Result<()> {
        let record: FutureRecord<'_, (), str> = FutureRecord::to(topic).payload(payload);
        let (partition, offset) = self
            .inner
            .send(record, self.message_timeout)
            .await
            .map_err(|(e, _)| PipelineError::PublishFailed(e.to_string()))?;
        debug!(topic, partition, offset, "delivered");
        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.inner.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| PipelineError::PublishFailed(format!("flush task failed: {}", e)))?
            .map_err(|e| PipelineError::PublishFailed(format!("flush: {}", e)))
    }

    fn in_flight(&self) -> usize {
        usize::try_from(self.inner.in_flight_count()).unwrap_or(0)
    }

    async fn topic_available(&self, topic: &str, timeout: Duration) -> Result<bool> {
        let producer = self.inner.clone();
        let name = topic.to_string();
        let metadata = tokio::task::spawn_blocking(move || {
            producer.client().fetch_metadata(Some(name.as_str()), timeout)
        })
        .await
        .map_err(|e| PipelineError::unavailable("broker", format!("metadata task failed: {}", e)))?
        .map_err(|e| PipelineError::unavailable("broker", e))?;

        Ok(metadata
            .topics()
            .iter()
            .any(|t| t.name() == topic && t.error().is_none() && !t.partitions().is_empty()))
    }
}
