//! Queue transport: two logical topics — MAIN (work-ready tasks) and RETRY
//! (delayed retry intents) — over an at-least-once, partition-ordered bus.
//!
//! [`Queue`] is the contract; [`memory::InMemoryQueue`] is the default,
//! dev/demo-friendly backend (what every test in this crate runs against);
//! [`kafka::KafkaQueue`] is a real `rdkafka` backend behind the `kafka`
//! feature, with manual offset commits and `task_id`-keyed partitioning.

pub mod memory;
#[cfg(feature = "kafka")]
pub mod kafka;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Publish operations must complete within this bound.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

/// `{"task_id":"<id>"}` — the MAIN topic payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,
}

/// `{"task_id":"<id>","next_retry_at":<epoch ms>}` — the RETRY topic payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryMessage {
    pub task_id: String,
    pub next_retry_at: i64,
}

/// A callback that acknowledges the exact message it was returned with.
/// Until called, the transport may redeliver the same message to this or
/// another consumer in the same group.
pub type CommitFn =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> + Send>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Payload failed to decode — a poison pill. The caller must still
    /// commit the offset to unblock progress.
    #[error("failed to decode message payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// Any other transport failure. Must not be swallowed; the caller must
    /// not commit and should retry.
    #[error("queue transport error: {0}")]
    Transport(#[source] anyhow::Error),
    /// A publish call exceeded [`PUBLISH_TIMEOUT`].
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Two-topic queue transport contract.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn publish_task(&self, task_id: &str) -> Result<(), QueueError>;
    async fn publish_retry(&self, task_id: &str, next_retry_at: i64) -> Result<(), QueueError>;

    /// Blocking receive from MAIN. Returns the decoded message and a commit
    /// callback, or a [`QueueError`]. On [`QueueError::Decode`] the offset
    /// has already been committed by the implementation (poison-pill rule).
    async fn read_task(&self) -> Result<(TaskMessage, CommitFn), QueueError>;

    /// Blocking receive from RETRY. Same poison-pill/commit discipline as
    /// [`Queue::read_task`].
    async fn read_retry(&self) -> Result<(RetryMessage, CommitFn), QueueError>;
}
