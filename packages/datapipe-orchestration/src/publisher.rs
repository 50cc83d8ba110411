//! Message publisher
//!
//! Wraps a producer configured for acknowledged, idempotent delivery. Each
//! publish is bounded by the message timeout here as well as in the producer.
//! `shutdown` consumes the publisher so the flush runs exactly once.

use crate::config::BrokerConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broker producer port
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Resolve once the broker acknowledged `payload` on `topic`
    async fn send(&self, topic: &str, payload: &str) -> Result<()>;

    /// Wait up to `timeout` for outstanding deliveries
    async fn flush(&self, timeout: Duration) -> Result<()>;

    /// Messages handed over but not yet acknowledged
    fn in_flight(&self) -> usize;

    /// Whether `topic` exists and reports no error
    async fn topic_available(&self, topic: &str, timeout: Duration) -> Result<bool>;
}

/// Outcome of the final flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub flushed: bool,
    pub undelivered: usize,
}

pub struct MessagePublisher {
    producer: Arc<dyn MessageProducer>,
    topic: String,
    message_timeout: Duration,
    flush_grace: Duration,
}

impl MessagePublisher {
    pub fn new(
        producer: Arc<dyn MessageProducer>,
        topic: impl Into<String>,
        message_timeout: Duration,
        flush_grace: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            message_timeout,
            flush_grace,
        }
    }

    pub fn from_config(producer: Arc<dyn MessageProducer>, config: &BrokerConfig) -> Self {
        Self::new(
            producer,
            config.topic.clone(),
            config.message_timeout(),
            config.flush_grace(),
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one message and wait for the acknowledgement
    ///
    /// # Errors
    ///
    /// `PublishTimeout` when no ack arrives within the message timeout,
    /// `PublishFailed` when the broker rejects it, `Cancelled` on `cancel`.
    pub async fn publish(&self, message: &str, cancel: &CancellationToken) -> Result<()> {
        let send = tokio::time::timeout(self.message_timeout, self.producer.send(&self.topic, message));

        tokio::select! {
            result = send => match result {
                Ok(Ok(())) => {
                    debug!(topic = %self.topic, bytes = message.len(), "message acknowledged");
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!(topic = %self.topic, timeout = ?self.message_timeout, "publish timed out");
                    Err(PipelineError::PublishTimeout(self.message_timeout))
                }
            },
            _ = cancel.cancelled() => Err(PipelineError::cancelled("publish")),
        }
    }

    pub async fn topic_available(&self) -> Result<bool> {
        self.producer
            .topic_available(&self.topic, self.message_timeout)
            .await
    }

    /// Flush within the grace period and report what was left behind
    pub async fn shutdown(self) -> ShutdownReport {
        let flushed = match tokio::time::timeout(self.flush_grace, self.producer.flush(self.flush_grace)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "producer flush failed");
                false
            }
            Err(_) => {
                warn!(grace = ?self.flush_grace, "producer flush exceeded grace period");
                false
            }
        };

        let undelivered = self.producer.in_flight();
        if undelivered > 0 {
            warn!(
                topic = %self.topic,
                undelivered,
                "publisher shut down with undelivered messages"
            );
        } else {
            info!(topic = %self.topic, "publisher shut down cleanly");
        }

        ShutdownReport {
            flushed: flushed && undelivered == 0,
            undelivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingProducer {
        sent: Mutex<Vec<(String, String)>>,
        ack_delay: Option<Duration>,
        reject: bool,
        stuck: AtomicUsize,
    }

    #[async_trait]
    impl MessageProducer for RecordingProducer {
        async fn send(&self, topic: &str, payload: &str) -> Result<()> {
            if let Some(delay) = self.ack_delay {
                tokio::time::sleep(delay).await;
            }
            if self.reject {
                return Err(PipelineError::PublishFailed("MSG_SIZE_TOO_LARGE".into()));
            }
            self.sent.lock().push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        async fn flush(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn in_flight(&self) -> usize {
            self.stuck.load(Ordering::SeqCst)
        }

        async fn topic_available(&self, topic: &str, _timeout: Duration) -> Result<bool> {
            Ok(topic == "events")
        }
    }

    fn publisher(producer: Arc<RecordingProducer>) -> MessagePublisher {
        MessagePublisher::new(
            producer,
            "events",
            Duration::from_millis(5000),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_publish_acknowledged() {
        let producer = Arc::new(RecordingProducer::default());
        let publisher = publisher(producer.clone());

        publisher.publish("{\"a\":1}", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            producer.sent.lock().as_slice(),
            &[("events".to_string(), "{\"a\":1}".to_string())]
        );
        assert!(publisher.topic_available().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout_enforced_locally() {
        let producer = Arc::new(RecordingProducer {
            ack_delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let publisher = publisher(producer.clone());

        let err = publisher.publish("{}", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::PublishTimeout(d) if d == Duration::from_millis(5000)));
        assert!(producer.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_publish_rejected() {
        let producer = Arc::new(RecordingProducer {
            reject: true,
            ..Default::default()
        });
        let err = publisher(producer)
            .publish("{}", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PublishFailed(_)));
    }

    #[tokio::test]
    async fn test_publish_cancelled() {
        let producer = Arc::new(RecordingProducer {
            ack_delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = publisher(producer).publish("{}", &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_shutdown_reports_undelivered() {
        let producer = Arc::new(RecordingProducer::default());
        producer.stuck.store(2, Ordering::SeqCst);

        let report = publisher(producer).shutdown().await;
        assert_eq!(
            report,
            ShutdownReport {
                flushed: false,
                undelivered: 2
            }
        );
    }

    #[tokio::test]
    async fn test_clean_shutdown() {
        let report = publisher(Arc::new(RecordingProducer::default())).shutdown().await;
        assert!(report.flushed);
        assert_eq!(report.undelivered, 0);
    }
}
