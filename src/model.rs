//! The durable task record and its lifecycle states.
//!
//! Field names here are the field names on the wire (HTTP JSON) and in the
//! store (SQLite column names), not renamed for Rust convention.

use serde::{Deserialize, Serialize};

/// Position of a [`Task`] in the claim/attempt/retry/DLQ state machine.
///
/// `SENT` and `DLQ` are terminal: no component may mutate the record
/// thereafter except via explicit replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Dlq,
}

impl TaskStatus {
    /// The exact wire/store string for this status — what gets written to
    /// the `status` TEXT column.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Sent => "SENT",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Dlq => "DLQ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "PROCESSING" => Some(TaskStatus::Processing),
            "SENT" => Some(TaskStatus::Sent),
            "FAILED" => Some(TaskStatus::Failed),
            "DLQ" => Some(TaskStatus::Dlq),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default `max_attempts` for a freshly created task.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Fixed channel value: this pipeline only ever dispatches over email, but
/// the field is carried (and round-tripped through the idempotency key) as a
/// schema field for future channels.
pub const CHANNEL_EMAIL: &str = "EMAIL";

/// The durable task record.
///
/// Serializes with the exact field names the HTTP surface and the store
/// expect — this `struct` is shared by `GET /notifications` responses, the
/// SQLite row shape, and the in-process state passed between components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub idempotency_key: String,
    pub event_type: String,
    pub entity_id: String,
    pub channel: String,
    pub recipient_email: String,
    pub priority: String,
    pub status: String,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub last_error: String,
    pub chaos_fail_percent: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<i64>,
    pub next_retry_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Pending)
    }

    /// `true` for `status ∈ {PENDING, FAILED}` — the set of states a claim
    /// may originate from.
    pub fn is_claimable(&self) -> bool {
        matches!(self.status(), TaskStatus::Pending | TaskStatus::Failed)
    }

    /// `max_attempts`, defaulting to 3 if the record somehow carries a
    /// non-positive value.
    pub fn effective_max_attempts(&self) -> i64 {
        if self.max_attempts <= 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            self.max_attempts
        }
    }
}

/// `idempotency_key = event_type:entity_id:channel:recipient`.
pub fn idempotency_key(event_type: &str, entity_id: &str, channel: &str, recipient: &str) -> String {
    format!("{event_type}:{entity_id}:{channel}:{recipient}")
}

/// Backoff applied before retry `new_attempt`: 2s, 5s, then 10s.
pub fn backoff_ms(new_attempt: i64) -> i64 {
    match new_attempt {
        1 => 2_000,
        2 => 5_000,
        _ => 10_000,
    }
}
