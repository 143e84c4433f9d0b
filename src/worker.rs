//! Worker Executor: drives a task from a MAIN message to a terminal or
//! scheduled-for-retry state.
//!
//! Generalized from "one worker" to "a pool of N identical tasks," each an
//! independent `tokio::spawn`-per-unit background job.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deliver::Deliver;
use crate::model::{backoff_ms, Task, TaskStatus};
use crate::queue::{Queue, QueueError};
use crate::store::{ClaimOutcome, Store};

/// Sleep before retrying after a transient transport error on `read_task`.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

pub struct Worker {
    worker_id: String,
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    deliver: Arc<dyn Deliver>,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        deliver: Arc<dyn Deliver>,
    ) -> Self {
        Worker {
            worker_id: worker_id.into(),
            store,
            queue,
            deliver,
        }
    }

    /// The independent per-worker loop. Runs until `cancel` is triggered;
    /// between I/O awaits it checks for cancellation so shutdown doesn't
    /// interrupt a claim-to-commit transition in progress.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let (msg, commit) = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.queue.read_task() => match result {
                    Ok(pair) => pair,
                    Err(QueueError::Decode(e)) => {
                        warn!(err = %e, "poison pill on MAIN — committed, skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!(err = %e, "transient error reading MAIN — backing off");
                        tokio::time::sleep(READ_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            match self.process_one(&msg.task_id).await {
                Ok(()) => {
                    if let Err(e) = commit().await {
                        warn!(task_id = %msg.task_id, err = %e, "commit failed — not fatal, claim protocol protects against reprocessing");
                    }
                }
                Err(e) => {
                    // Do NOT commit: redelivery plus the claim protocol
                    // will converge.
                    warn!(task_id = %msg.task_id, err = %e, "process error — leaving message uncommitted for redelivery");
                    drop(commit);
                }
            }
        }
    }

    /// Returns `Ok(())` once the task has reached a state where the MAIN
    /// message may safely be committed: a terminal state was written, or a
    /// retry was both recorded and published, or there was simply no work
    /// to do. Any other error means the message must not be committed.
    pub async fn process_one(&self, task_id: &str) -> anyhow::Result<()> {
        let task = match self.store.get_task_by_id(task_id).await? {
            Some(t) => t,
            None => {
                debug!(%task_id, "task missing from store — nothing to do");
                return Ok(());
            }
        };

        let now = crate::now_ms();
        if task.next_retry_at > 0 && now < task.next_retry_at {
            debug!(%task_id, "early redelivery during backoff — ignoring, scheduler owns the real trigger");
            return Ok(());
        }

        let claim = self.store.claim_task(task_id, &self.worker_id, now).await?;
        if claim != ClaimOutcome::Claimed {
            debug!(%task_id, "claim lost the race or task already terminal — nothing to do");
            return Ok(());
        }

        let (ok, err_msg) = self.attempt_send(&task).await;
        let new_attempt = task.attempt_count + 1;
        let max = task.effective_max_attempts();
        let now = crate::now_ms();

        if ok {
            self.store
                .update_after_attempt(task_id, TaskStatus::Sent, new_attempt, "", now)
                .await?;
            info!(%task_id, attempt = new_attempt, "delivered");
            return Ok(());
        }

        if new_attempt >= max {
            self.store
                .update_after_attempt(task_id, TaskStatus::Dlq, new_attempt, &err_msg, now)
                .await?;
            warn!(%task_id, attempt = new_attempt, err = %err_msg, "exhausted retries — moved to DLQ");
            return Ok(());
        }

        let delay = backoff_ms(new_attempt);
        let next_retry_at = now + delay;
        self.store
            .update_for_retry(task_id, new_attempt, &err_msg, next_retry_at, now)
            .await?;
        // Both the store update and the retry publish must succeed before
        // the MAIN message may be committed — propagating this error leaves
        // the message uncommitted, so a redelivery will retry scheduling.
        self.queue.publish_retry(task_id, next_retry_at).await?;
        warn!(%task_id, attempt = new_attempt, next_retry_at, err = %err_msg, "delivery failed — scheduled retry");
        Ok(())
    }

    /// Chaos injection + the `Deliver` capability. Draws from `rand`'s
    /// thread-local RNG fresh each call — callers must not assume any
    /// particular sequence is reproducible.
    async fn attempt_send(&self, task: &Task) -> (bool, String) {
        let percent = task.chaos_fail_percent.clamp(0, 100);
        let roll: i64 = rand::thread_rng().gen_range(0..100);
        if roll < percent {
            return (false, "chaos injected failure".to_string());
        }

        let subject = format!("[notifyd] {} ({})", task.event_type, task.entity_id);
        let body = format!(
            "TaskID: {}\nEventType: {}\nEntityID: {}\nPriority: {}\nChannel: {}\n",
            task.task_id, task.event_type, task.entity_id, task.priority, task.channel
        );

        match self.deliver.send(&task.recipient_email, &subject, &body).await {
            Ok(()) => (true, String::new()),
            Err(e) => (false, format!("delivery failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliver::logging::LoggingDeliverer;
    use crate::deliver::DeliverError;
    use crate::model::{idempotency_key, CHANNEL_EMAIL, DEFAULT_MAX_ATTEMPTS};
    use crate::queue::memory::InMemoryQueue;
    use crate::store::sqlite::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_task(id: &str, chaos: i64, max_attempts: i64) -> Task {
        let now = crate::now_ms();
        Task {
            task_id: id.to_string(),
            idempotency_key: idempotency_key("ticket_escalated", "T-1", CHANNEL_EMAIL, "a@b.com"),
            event_type: "ticket_escalated".into(),
            entity_id: "T-1".into(),
            channel: CHANNEL_EMAIL.into(),
            recipient_email: "a@b.com".into(),
            priority: "HIGH".into(),
            status: TaskStatus::Pending.as_str().into(),
            attempt_count: 0,
            max_attempts,
            last_error: String::new(),
            chaos_fail_percent: chaos,
            worker_id: None,
            processing_started_at: None,
            next_retry_at: 0,
            created_at: now,
            updated_at: now,
        }
    }

    struct ScriptedDeliverer {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl Deliver for ScriptedDeliverer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), DeliverError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(DeliverError("scripted failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    async fn new_harness() -> (Arc<dyn Store>, Arc<dyn Queue>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        (store, queue)
    }

    #[tokio::test]
    async fn happy_path_sends_and_commits() {
        let (store, queue) = new_harness().await;
        let worker = Worker::new(
            "worker-1",
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::new(LoggingDeliverer::new("notices@example.com")),
        );

        let task = new_task("t1", 0, DEFAULT_MAX_ATTEMPTS);
        store.put_task(&task).await.unwrap();
        queue.publish_task("t1").await.unwrap();

        let (msg, commit) = queue.read_task().await.unwrap();
        worker.process_one(&msg.task_id).await.unwrap();
        commit().await.unwrap();

        let final_task = store.get_task_by_id("t1").await.unwrap().unwrap();
        assert_eq!(final_task.status(), TaskStatus::Sent);
        assert_eq!(final_task.attempt_count, 1);
        assert!(final_task.worker_id.is_none());
    }

    #[tokio::test]
    async fn failure_schedules_retry_and_publishes_retry_message() {
        let (store, queue) = new_harness().await;
        let deliver = Arc::new(ScriptedDeliverer {
            calls: AtomicUsize::new(0),
            fail_first_n: 10,
        });
        let worker = Worker::new("worker-1", Arc::clone(&store), Arc::clone(&queue), deliver);

        let task = new_task("t2", 0, 3);
        store.put_task(&task).await.unwrap();
        queue.publish_task("t2").await.unwrap();
        let (msg, commit) = queue.read_task().await.unwrap();
        worker.process_one(&msg.task_id).await.unwrap();
        commit().await.unwrap();

        let after = store.get_task_by_id("t2").await.unwrap().unwrap();
        assert_eq!(after.status(), TaskStatus::Failed);
        assert_eq!(after.attempt_count, 1);
        assert!(after.next_retry_at > 0);

        let (retry_msg, retry_commit) = queue.read_retry().await.unwrap();
        assert_eq!(retry_msg.task_id, "t2");
        assert_eq!(retry_msg.next_retry_at, after.next_retry_at);
        retry_commit().await.unwrap();
    }

    #[tokio::test]
    async fn exhaustion_moves_to_dlq_without_retry_message() {
        let (store, queue) = new_harness().await;
        let deliver = Arc::new(ScriptedDeliverer {
            calls: AtomicUsize::new(0),
            fail_first_n: 10,
        });
        let worker = Worker::new("worker-1", Arc::clone(&store), Arc::clone(&queue), deliver);

        let mut task = new_task("t3", 0, 1);
        task.attempt_count = 0;
        store.put_task(&task).await.unwrap();
        queue.publish_task("t3").await.unwrap();
        let (msg, commit) = queue.read_task().await.unwrap();
        worker.process_one(&msg.task_id).await.unwrap();
        commit().await.unwrap();

        let after = store.get_task_by_id("t3").await.unwrap().unwrap();
        assert_eq!(after.status(), TaskStatus::Dlq);
        assert_eq!(after.attempt_count, 1);
        assert!(after.worker_id.is_none());
        assert!(after.processing_started_at.is_none());

        // No RETRY message should have been published.
        let retry_result = tokio::time::timeout(Duration::from_millis(50), queue.read_retry()).await;
        assert!(retry_result.is_err(), "expected no RETRY message after DLQ");
    }

    #[tokio::test]
    async fn duplicate_redelivery_of_sent_task_is_a_noop() {
        let (store, queue) = new_harness().await;
        let worker = Worker::new(
            "worker-1",
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::new(LoggingDeliverer::new("notices@example.com")),
        );

        let task = new_task("t4", 0, DEFAULT_MAX_ATTEMPTS);
        store.put_task(&task).await.unwrap();
        worker.process_one("t4").await.unwrap();

        let sent = store.get_task_by_id("t4").await.unwrap().unwrap();
        assert_eq!(sent.status(), TaskStatus::Sent);

        // Simulate a second worker receiving a redelivered MAIN message.
        worker.process_one("t4").await.unwrap();
        let unchanged = store.get_task_by_id("t4").await.unwrap().unwrap();
        assert_eq!(unchanged.status(), TaskStatus::Sent);
        assert_eq!(unchanged.attempt_count, 1);
    }

    #[tokio::test]
    async fn early_redelivery_during_backoff_is_ignored() {
        let (store, queue) = new_harness().await;
        let worker = Worker::new(
            "worker-1",
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::new(LoggingDeliverer::new("notices@example.com")),
        );

        let mut task = new_task("t5", 0, DEFAULT_MAX_ATTEMPTS);
        task.status = TaskStatus::Failed.as_str().into();
        task.attempt_count = 1;
        task.next_retry_at = crate::now_ms() + 60_000;
        store.put_task(&task).await.unwrap();

        worker.process_one("t5").await.unwrap();

        let after = store.get_task_by_id("t5").await.unwrap().unwrap();
        assert_eq!(after.status(), TaskStatus::Failed);
        assert!(after.worker_id.is_none());
        assert_eq!(after.attempt_count, 1);
    }

    #[tokio::test]
    async fn only_one_of_n_concurrent_claims_succeeds() {
        let (store, _queue) = new_harness().await;
        let task = new_task("t6", 0, DEFAULT_MAX_ATTEMPTS);
        store.put_task(&task).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim_task("t6", &format!("worker-{i}"), crate::now_ms()).await.unwrap()
            }));
        }

        let mut claimed = 0;
        for h in handles {
            if h.await.unwrap() == ClaimOutcome::Claimed {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }
}
