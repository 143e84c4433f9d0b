//! The default, dev/demo-friendly [`Queue`] backend.
//!
//! Per-topic, per-partition (`task_id`-hashed) `tokio::sync::mpsc` channels
//! multiplexed with [`tokio_stream::StreamMap`] so a `read_*` call races all
//! partitions without missing wakeups. Messages for the same `task_id`
//! always hash to the same partition, so per-task ordering holds even
//! though cross-task ordering does not.
//!
//! An uncommitted message is requeued the moment its [`CommitFn`] is
//! dropped without being called — this is what makes duplicate/early
//! redelivery scenarios reproducible without an external broker.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt, StreamMap};
use tracing::debug;

use super::{CommitFn, Queue, QueueError, RetryMessage, TaskMessage, PUBLISH_TIMEOUT};

const DEFAULT_PARTITIONS: usize = 4;

struct RedeliveryGuard {
    payload: Option<Vec<u8>>,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl Drop for RedeliveryGuard {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            debug!("message dropped without commit — requeuing for redelivery");
            let _ = self.sender.send(payload);
        }
    }
}

fn make_commit(payload: Vec<u8>, sender: mpsc::UnboundedSender<Vec<u8>>) -> CommitFn {
    let mut guard = RedeliveryGuard {
        payload: Some(payload),
        sender,
    };
    Box::new(move || {
        guard.payload = None;
        Box::pin(async move { Ok(()) })
    })
}

struct Topic {
    partitions: usize,
    senders: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    stream_map: AsyncMutex<StreamMap<usize, UnboundedReceiverStream<Vec<u8>>>>,
}

impl Topic {
    fn new(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut map = StreamMap::new();
        for i in 0..partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            map.insert(i, UnboundedReceiverStream::new(rx));
        }
        Topic {
            partitions,
            senders,
            stream_map: AsyncMutex::new(map),
        }
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions
    }

    fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let idx = self.partition_for(key);
        self.senders[idx]
            .send(payload)
            .map_err(|e| QueueError::Transport(anyhow::anyhow!("queue partition closed: {e}")))
    }

    /// Blocks until a message is available on any partition, returning its
    /// partition index (so the commit callback redelivers to the same
    /// partition) and raw payload bytes.
    async fn read(&self) -> (usize, Vec<u8>) {
        let mut map = self.stream_map.lock().await;
        loop {
            if let Some((idx, payload)) = map.next().await {
                return (idx, payload);
            }
        }
    }

    fn sender_for(&self, idx: usize) -> mpsc::UnboundedSender<Vec<u8>> {
        self.senders[idx].clone()
    }
}

/// In-memory [`Queue`] implementation. Cheap to construct; one instance is
/// shared (via `Arc`) across Intake, every worker, and the scheduler within
/// a process.
pub struct InMemoryQueue {
    main: Topic,
    retry: Topic,
}

impl InMemoryQueue {
    pub fn new(partitions: usize) -> Self {
        InMemoryQueue {
            main: Topic::new(partitions),
            retry: Topic::new(partitions),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        InMemoryQueue::new(DEFAULT_PARTITIONS)
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn publish_task(&self, task_id: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&TaskMessage {
            task_id: task_id.to_string(),
        })?;
        tokio::time::timeout(PUBLISH_TIMEOUT, async { self.main.publish(task_id, payload) })
            .await
            .map_err(|_| QueueError::Timeout(PUBLISH_TIMEOUT))?
    }

    async fn publish_retry(&self, task_id: &str, next_retry_at: i64) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&RetryMessage {
            task_id: task_id.to_string(),
            next_retry_at,
        })?;
        tokio::time::timeout(PUBLISH_TIMEOUT, async { self.retry.publish(task_id, payload) })
            .await
            .map_err(|_| QueueError::Timeout(PUBLISH_TIMEOUT))?
    }

    async fn read_task(&self) -> Result<(TaskMessage, CommitFn), QueueError> {
        let (idx, payload) = self.main.read().await;
        match serde_json::from_slice::<TaskMessage>(&payload) {
            Ok(msg) => {
                let commit = make_commit(payload, self.main.sender_for(idx));
                Ok((msg, commit))
            }
            Err(e) => {
                debug!(err = %e, "poison pill on MAIN — dropping without requeue");
                Err(QueueError::Decode(e))
            }
        }
    }

    async fn read_retry(&self) -> Result<(RetryMessage, CommitFn), QueueError> {
        let (idx, payload) = self.retry.read().await;
        match serde_json::from_slice::<RetryMessage>(&payload) {
            Ok(msg) => {
                let commit = make_commit(payload, self.retry.sender_for(idx));
                Ok((msg, commit))
            }
            Err(e) => {
                debug!(err = %e, "poison pill on RETRY — dropping without requeue");
                Err(QueueError::Decode(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_read_round_trips() {
        let q = InMemoryQueue::default();
        q.publish_task("t1").await.unwrap();
        let (msg, commit) = q.read_task().await.unwrap();
        assert_eq!(msg.task_id, "t1");
        commit().await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_message_is_redelivered_on_drop() {
        let q = InMemoryQueue::new(1);
        q.publish_task("t1").await.unwrap();
        let (msg, commit) = q.read_task().await.unwrap();
        assert_eq!(msg.task_id, "t1");
        drop(commit); // never committed

        let (msg2, commit2) = q.read_task().await.unwrap();
        assert_eq!(msg2.task_id, "t1");
        commit2().await.unwrap();
    }

    #[tokio::test]
    async fn committed_message_is_not_redelivered() {
        let q = InMemoryQueue::new(1);
        q.publish_task("t1").await.unwrap();
        let (_, commit) = q.read_task().await.unwrap();
        commit().await.unwrap();

        q.publish_task("t2").await.unwrap();
        let (msg, _commit) = q.read_task().await.unwrap();
        assert_eq!(msg.task_id, "t2");
    }

    #[tokio::test]
    async fn retry_topic_is_independent_of_main() {
        let q = InMemoryQueue::default();
        q.publish_retry("t1", 12345).await.unwrap();
        let (msg, commit) = q.read_retry().await.unwrap();
        assert_eq!(msg.task_id, "t1");
        assert_eq!(msg.next_retry_at, 12345);
        commit().await.unwrap();
    }

    #[tokio::test]
    async fn same_task_id_always_hashes_to_same_partition() {
        let topic = Topic::new(8);
        let a = topic.partition_for("same-key");
        let b = topic.partition_for("same-key");
        assert_eq!(a, b);
    }
}
