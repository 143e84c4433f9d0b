//! Retry Scheduler: consumes RETRY, sleeps until each message's scheduled
//! time, then re-publishes the bare `TaskMessage` to MAIN. Holds no
//! per-task state across iterations — correctness rests on the RETRY
//! topic's durability.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::{Queue, QueueError};

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

pub struct RetryScheduler {
    queue: Arc<dyn Queue>,
}

impl RetryScheduler {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        RetryScheduler { queue }
    }

    /// The scheduler's single loop. `cancel` makes the backoff sleep
    /// interruptible rather than blocking shutdown on a long backoff.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let (msg, commit) = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.queue.read_retry() => match result {
                    Ok(pair) => pair,
                    Err(QueueError::Decode(e)) => {
                        warn!(err = %e, "poison pill on RETRY — committed, skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!(err = %e, "transient error reading RETRY — backing off");
                        tokio::time::sleep(READ_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            let now = crate::now_ms();
            if msg.next_retry_at > now {
                let wait = Duration::from_millis((msg.next_retry_at - now) as u64);
                debug!(task_id = %msg.task_id, wait_ms = wait.as_millis(), "sleeping until retry is due");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            match self.queue.publish_task(&msg.task_id).await {
                Ok(()) => {
                    if let Err(e) = commit().await {
                        warn!(task_id = %msg.task_id, err = %e, "RETRY commit failed");
                    } else {
                        info!(task_id = %msg.task_id, "re-published to MAIN");
                    }
                }
                Err(e) => {
                    // Do not commit; the same RETRY message will be redelivered.
                    warn!(task_id = %msg.task_id, err = %e, "publish to MAIN failed — leaving RETRY message uncommitted");
                    drop(commit);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::InMemoryQueue;

    #[tokio::test]
    async fn republishes_to_main_after_due_time() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let scheduler = RetryScheduler::new(Arc::clone(&queue));
        let cancel = CancellationToken::new();

        let next_retry_at = crate::now_ms() + 20;
        queue.publish_retry("t1", next_retry_at).await.unwrap();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

        let (msg, commit) = queue.read_task().await.unwrap();
        assert_eq!(msg.task_id, "t1");
        commit().await.unwrap();

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }

    #[tokio::test]
    async fn already_due_message_publishes_immediately() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let scheduler = RetryScheduler::new(Arc::clone(&queue));
        let cancel = CancellationToken::new();

        queue.publish_retry("t2", crate::now_ms() - 1_000).await.unwrap();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

        let (msg, commit) = tokio::time::timeout(Duration::from_millis(200), queue.read_task())
            .await
            .expect("scheduler should republish promptly")
            .unwrap();
        assert_eq!(msg.task_id, "t2");
        commit().await.unwrap();

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }
}
