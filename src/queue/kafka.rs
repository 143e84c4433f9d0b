//! Real Kafka-backed [`Queue`], feature-gated behind `kafka` (off by
//! default, the same way an optional telemetry backend stays off until a
//! feature turns it on).
//!
//! Manual offset commits, `task_id`-keyed partitioning, a 3s publish
//! timeout, and the poison-pill-commits-and-surfaces-error rule.

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Message as _, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::debug;

use super::{CommitFn, Queue, QueueError, RetryMessage, TaskMessage, PUBLISH_TIMEOUT};

fn transport_err(e: KafkaError) -> QueueError {
    QueueError::Transport(anyhow::anyhow!(e))
}

/// Configuration for [`KafkaQueue`], wired from the `KAFKA_BROKERS`,
/// `KAFKA_TOPIC_MAIN`, `KAFKA_TOPIC_RETRY`, and
/// `KAFKA_GROUP_ID`/`KAFKA_SCHEDULER_GROUP` env vars.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic_main: String,
    pub topic_retry: String,
    pub group_id: String,
}

pub struct KafkaQueue {
    producer: FutureProducer,
    main_consumer: std::sync::Arc<StreamConsumer>,
    retry_consumer: std::sync::Arc<StreamConsumer>,
    topic_main: String,
    topic_retry: String,
}

impl KafkaQueue {
    pub fn new(cfg: &KafkaConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .create()?;

        let main_consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("group.id", &cfg.group_id)
            .set("enable.auto.commit", "false")
            .create()?;
        main_consumer.subscribe(&[&cfg.topic_main])?;

        let retry_consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("group.id", format!("{}-retry", cfg.group_id))
            .set("enable.auto.commit", "false")
            .create()?;
        retry_consumer.subscribe(&[&cfg.topic_retry])?;

        Ok(KafkaQueue {
            producer,
            main_consumer: std::sync::Arc::new(main_consumer),
            retry_consumer: std::sync::Arc::new(retry_consumer),
            topic_main: cfg.topic_main.clone(),
            topic_retry: cfg.topic_retry.clone(),
        })
    }

    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        self.producer
            .send(record, PUBLISH_TIMEOUT)
            .await
            .map_err(|(e, _)| transport_err(e))?;
        Ok(())
    }

    fn commit_for(consumer_is_main: bool, msg: OwnedMessage, producer_handle: KafkaHandles) -> CommitFn {
        Box::new(move || {
            Box::pin(async move {
                let consumer = if consumer_is_main {
                    &producer_handle.main_consumer
                } else {
                    &producer_handle.retry_consumer
                };
                consumer
                    .commit_message(&msg, CommitMode::Async)
                    .map_err(transport_err)
            })
        })
    }
}

/// Cheap handle clones shared between reads and their commit callbacks.
/// `rdkafka`'s consumers are `Arc`-backed internally and safe to share.
#[derive(Clone)]
struct KafkaHandles {
    main_consumer: std::sync::Arc<StreamConsumer>,
    retry_consumer: std::sync::Arc<StreamConsumer>,
}

#[async_trait]
impl Queue for KafkaQueue {
    async fn publish_task(&self, task_id: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&TaskMessage {
            task_id: task_id.to_string(),
        })?;
        self.publish(&self.topic_main, task_id, payload).await
    }

    async fn publish_retry(&self, task_id: &str, next_retry_at: i64) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&RetryMessage {
            task_id: task_id.to_string(),
            next_retry_at,
        })?;
        self.publish(&self.topic_retry, task_id, payload).await
    }

    async fn read_task(&self) -> Result<(TaskMessage, CommitFn), QueueError> {
        let borrowed = self.main_consumer.recv().await.map_err(transport_err)?;
        let owned = borrowed.detach();
        match owned.payload().map(serde_json::from_slice::<TaskMessage>) {
            Some(Ok(msg)) => {
                let handles = KafkaHandles {
                    main_consumer: std::sync::Arc::clone(&self.main_consumer),
                    retry_consumer: std::sync::Arc::clone(&self.retry_consumer),
                };
                Ok((msg, Self::commit_for(true, owned, handles)))
            }
            Some(Err(e)) => {
                debug!(err = %e, "poison pill on MAIN — committing to unblock progress");
                let _ = self.main_consumer.commit_message(&owned, CommitMode::Async);
                Err(QueueError::Decode(e))
            }
            None => Err(QueueError::Transport(anyhow::anyhow!("empty Kafka payload"))),
        }
    }

    async fn read_retry(&self) -> Result<(RetryMessage, CommitFn), QueueError> {
        let borrowed = self.retry_consumer.recv().await.map_err(transport_err)?;
        let owned = borrowed.detach();
        match owned.payload().map(serde_json::from_slice::<RetryMessage>) {
            Some(Ok(msg)) => {
                let handles = KafkaHandles {
                    main_consumer: std::sync::Arc::clone(&self.main_consumer),
                    retry_consumer: std::sync::Arc::clone(&self.retry_consumer),
                };
                Ok((msg, Self::commit_for(false, owned, handles)))
            }
            Some(Err(e)) => {
                debug!(err = %e, "poison pill on RETRY — committing to unblock progress");
                let _ = self.retry_consumer.commit_message(&owned, CommitMode::Async);
                Err(QueueError::Decode(e))
            }
            None => Err(QueueError::Transport(anyhow::anyhow!("empty Kafka payload"))),
        }
    }
}
