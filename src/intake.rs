//! Intake Publisher: materializes a `Task` in the store with status
//! `PENDING` and publishes a `TaskMessage{task_id}` to MAIN. Also hosts the
//! Replay operation, which reuses the same publish step.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::model::{idempotency_key, Task, TaskStatus, CHANNEL_EMAIL, DEFAULT_MAX_ATTEMPTS};
use crate::queue::Queue;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::Store;

/// Caller-supplied event descriptor for `POST /events`.
#[derive(Debug, Clone, Default)]
pub struct EventRequest {
    pub event_type: Option<String>,
    pub entity_id: Option<String>,
    pub recipient_email: Option<String>,
    pub priority: Option<String>,
    pub chaos_fail_percent: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct IntakeResult {
    pub task_id: String,
    pub idempotency_key: String,
    pub entity_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),
}

/// Fills in defaults for a partially-specified event.
///
/// `task_id` is a UUID v4 rather than a small random integer space, which
/// would make collisions likely at scale.
pub struct IntakePublisher {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
}

impl IntakePublisher {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn Queue>) -> Self {
        IntakePublisher { store, queue }
    }

    /// `(event_type, entity_id, recipient, priority, chaos_fail_percent) ->
    /// Task` creation + MAIN publish.
    pub async fn submit(&self, req: EventRequest) -> Result<IntakeResult, IntakeError> {
        let event_type = req.event_type.unwrap_or_else(|| "ticket_escalated".to_string());
        let entity_id = req.entity_id.unwrap_or_else(|| "TICKET-XXXX".to_string());
        let recipient_email = req.recipient_email.unwrap_or_else(|| "demo@example.com".to_string());
        let priority = req.priority.unwrap_or_else(|| "HIGH".to_string());
        let chaos_fail_percent = req.chaos_fail_percent.unwrap_or(0).clamp(0, 100);

        let task_id = Uuid::new_v4().to_string();
        let key = idempotency_key(&event_type, &entity_id, CHANNEL_EMAIL, &recipient_email);
        let now = crate::now_ms();

        let task = Task {
            task_id: task_id.clone(),
            idempotency_key: key.clone(),
            event_type,
            entity_id: entity_id.clone(),
            channel: CHANNEL_EMAIL.to_string(),
            recipient_email,
            priority,
            status: TaskStatus::Pending.as_str().to_string(),
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: String::new(),
            chaos_fail_percent,
            worker_id: None,
            processing_started_at: None,
            next_retry_at: 0,
            created_at: now,
            updated_at: now,
        };

        // Transient store errors get a small bounded retry; the publish
        // step below never does — its failure must propagate immediately,
        // not be swallowed.
        let store = Arc::clone(&self.store);
        let put_task = task.clone();
        retry_with_backoff(&RetryConfig::default(), move || {
            let store = Arc::clone(&store);
            let task = put_task.clone();
            async move { store.put_task(&task).await }
        })
        .await?;

        self.queue.publish_task(&task_id).await?;

        info!(%task_id, idempotency_key = %key, "task created");

        Ok(IntakeResult {
            task_id,
            idempotency_key: key,
            entity_id,
        })
    }

    /// Replay: `ResetForReplay` then `PublishTask`. Order matters — reset
    /// precedes publish so a racing worker reading the replayed message
    /// observes a claimable state. Does not verify the task's current
    /// state: an operator can replay a task that is mid-flight.
    pub async fn replay(&self, task_id: &str) -> Result<(), IntakeError> {
        let now = crate::now_ms();
        self.store.reset_for_replay(task_id, now).await?;
        self.queue.publish_task(task_id).await?;
        info!(%task_id, "task replayed");
        Ok(())
    }
}
