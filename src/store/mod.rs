//! The durable store: sole authority on task state.
//!
//! `Store` is the contract; [`sqlite::SqliteStore`] is the one shipped
//! implementation (`SqlitePool`, WAL journal mode). A DynamoDB-backed or
//! other key/value-backed implementation could satisfy the same contract.

pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Task;

/// Errors a [`Store`] call can surface.
///
/// A claim losing the race is deliberately *not* a variant here — it is
/// modeled as [`ClaimOutcome::NotClaimed`], an `Ok` value, so it can never be
/// confused with a genuine I/O failure at a call site. The precondition
/// failing and a transport error must stay distinguishable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of [`Store::claim_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// The conditional update's precondition failed: the task was not in
    /// `{PENDING, FAILED}` at the time of the attempt (already claimed,
    /// already terminal, or absent). Not an error — a normal outcome.
    NotClaimed,
}

impl ClaimOutcome {
    pub fn claimed(self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// The durable store contract.
#[async_trait]
pub trait Store: Send + Sync {
    /// Unconditional insert. Used only by Intake; `task_id` is freshly
    /// generated so overwrites should not occur in practice.
    async fn put_task(&self, task: &Task) -> StoreResult<()>;

    /// Point read.
    async fn get_task_by_id(&self, task_id: &str) -> StoreResult<Option<Task>>;

    /// Bounded scan for the operator UI. Order is unspecified.
    async fn list_tasks(&self, limit: i64) -> StoreResult<Vec<Task>>;

    /// Conditional update: if `status ∈ {PENDING, FAILED}`, transition to
    /// `PROCESSING` and stamp `worker_id`/`processing_started_at`/`updated_at`.
    /// Otherwise reports [`ClaimOutcome::NotClaimed`] without mutating the row.
    async fn claim_task(&self, task_id: &str, worker_id: &str, now_ms: i64) -> StoreResult<ClaimOutcome>;

    /// Unconditional SET of `status`, `attempt_count`, `last_error`,
    /// `updated_at`; REMOVE `worker_id`/`processing_started_at` so a
    /// terminal `SENT`/`DLQ` row satisfies "present iff `PROCESSING`".
    /// Used for the `SENT` and `DLQ` terminal transitions.
    async fn update_after_attempt(
        &self,
        task_id: &str,
        new_status: crate::model::TaskStatus,
        attempt_count: i64,
        last_error: &str,
        now_ms: i64,
    ) -> StoreResult<()>;

    /// SET `status=FAILED`, `attempt_count`, `last_error`, `next_retry_at`,
    /// `updated_at`; REMOVE `worker_id`/`processing_started_at`.
    async fn update_for_retry(
        &self,
        task_id: &str,
        attempt_count: i64,
        last_error: &str,
        next_retry_at: i64,
        now_ms: i64,
    ) -> StoreResult<()>;

    /// Operator override: SET `status=PENDING, attempt_count=0,
    /// last_error="", next_retry_at=0, updated_at=now`; REMOVE
    /// `worker_id`/`processing_started_at`. Does not verify prior state.
    async fn reset_for_replay(&self, task_id: &str, now_ms: i64) -> StoreResult<()>;

    /// Scan for `PENDING`/`FAILED` rows. Kept on the trait for completeness
    /// even though the Worker's current flow never calls it — a future
    /// polling-worker variant or recovery sweep would want it.
    async fn list_processable(&self, limit: i64) -> StoreResult<Vec<Task>>;
}
