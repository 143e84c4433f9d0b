//! SQLite-backed [`Store`] — the one concrete durable store this crate
//! ships (`SqlitePool`, WAL journal mode, `NORMAL` synchronous,
//! `create_if_missing`).
//!
//! `ClaimTask`'s conditional update has no native "conditional check failed"
//! exception in SQLite's client API (unlike, say, DynamoDB's
//! `ConditionalCheckFailedException`), so the same distinction is made by
//! inspecting `rows_affected()` on a single
//! `UPDATE ... WHERE status IN ('PENDING','FAILED')` statement.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};

use crate::model::{Task, TaskStatus};
use crate::store::{ClaimOutcome, Store, StoreError, StoreResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    idempotency_key: String,
    event_type: String,
    entity_id: String,
    channel: String,
    recipient_email: String,
    priority: String,
    status: String,
    attempt_count: i64,
    max_attempts: i64,
    last_error: String,
    chaos_fail_percent: i64,
    worker_id: Option<String>,
    processing_started_at: Option<i64>,
    next_retry_at: i64,
    created_at: i64,
    updated_at: i64,
}

impl From<TaskRow> for Task {
    fn from(r: TaskRow) -> Self {
        Task {
            task_id: r.task_id,
            idempotency_key: r.idempotency_key,
            event_type: r.event_type,
            entity_id: r.entity_id,
            channel: r.channel,
            recipient_email: r.recipient_email,
            priority: r.priority,
            status: r.status,
            attempt_count: r.attempt_count,
            max_attempts: r.max_attempts,
            last_error: r.last_error,
            chaos_fail_percent: r.chaos_fail_percent,
            worker_id: r.worker_id,
            processing_started_at: r.processing_started_at,
            next_retry_at: r.next_retry_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a WAL-mode SQLite database at
    /// `data_dir/notifyd.db` and run migrations.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("notifyd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database — used by tests so each test gets an isolated store
    /// without touching the filesystem.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        for stmt in include_str!("migrations/001_init.sql").split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(pool).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_task(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, idempotency_key, event_type, entity_id, channel,
                recipient_email, priority, status, attempt_count, max_attempts,
                last_error, chaos_fail_percent, worker_id, processing_started_at,
                next_retry_at, created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(task_id) DO UPDATE SET
                idempotency_key = excluded.idempotency_key,
                event_type = excluded.event_type,
                entity_id = excluded.entity_id,
                channel = excluded.channel,
                recipient_email = excluded.recipient_email,
                priority = excluded.priority,
                status = excluded.status,
                attempt_count = excluded.attempt_count,
                max_attempts = excluded.max_attempts,
                last_error = excluded.last_error,
                chaos_fail_percent = excluded.chaos_fail_percent,
                worker_id = excluded.worker_id,
                processing_started_at = excluded.processing_started_at,
                next_retry_at = excluded.next_retry_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.idempotency_key)
        .bind(&task.event_type)
        .bind(&task.entity_id)
        .bind(&task.channel)
        .bind(&task.recipient_email)
        .bind(&task.priority)
        .bind(&task.status)
        .bind(task.attempt_count)
        .bind(task.max_attempts)
        .bind(&task.last_error)
        .bind(task.chaos_fail_percent)
        .bind(&task.worker_id)
        .bind(task.processing_started_at)
        .bind(task.next_retry_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .context("put_task")
        .map_err(StoreError::Io)?;
        Ok(())
    }

    async fn get_task_by_id(&self, task_id: &str) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("get_task_by_id")
            .map_err(StoreError::Io)?;
        Ok(row.map(Task::from))
    }

    async fn list_tasks(&self, limit: i64) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("list_tasks")
            .map_err(StoreError::Io)?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    async fn claim_task(&self, task_id: &str, worker_id: &str, now_ms: i64) -> StoreResult<ClaimOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
               SET status = ?, worker_id = ?, processing_started_at = ?, updated_at = ?
             WHERE task_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(TaskStatus::Processing.as_str())
        .bind(worker_id)
        .bind(now_ms)
        .bind(now_ms)
        .bind(task_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Failed.as_str())
        .execute(&self.pool)
        .await
        .context("claim_task")
        .map_err(StoreError::Io)?;

        if result.rows_affected() > 0 {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::NotClaimed)
        }
    }

    async fn update_after_attempt(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        attempt_count: i64,
        last_error: &str,
        now_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
               SET status = ?, attempt_count = ?, last_error = ?, updated_at = ?,
                   worker_id = NULL, processing_started_at = NULL
             WHERE task_id = ?
            "#,
        )
        .bind(new_status.as_str())
        .bind(attempt_count)
        .bind(last_error)
        .bind(now_ms)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("update_after_attempt")
        .map_err(StoreError::Io)?;
        Ok(())
    }

    async fn update_for_retry(
        &self,
        task_id: &str,
        attempt_count: i64,
        last_error: &str,
        next_retry_at: i64,
        now_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
               SET status = ?, attempt_count = ?, last_error = ?, next_retry_at = ?,
                   updated_at = ?, worker_id = NULL, processing_started_at = NULL
             WHERE task_id = ?
            "#,
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(attempt_count)
        .bind(last_error)
        .bind(next_retry_at)
        .bind(now_ms)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("update_for_retry")
        .map_err(StoreError::Io)?;
        Ok(())
    }

    async fn reset_for_replay(&self, task_id: &str, now_ms: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
               SET status = ?, attempt_count = 0, last_error = '', next_retry_at = 0,
                   updated_at = ?, worker_id = NULL, processing_started_at = NULL
             WHERE task_id = ?
            "#,
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(now_ms)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("reset_for_replay")
        .map_err(StoreError::Io)?;
        Ok(())
    }

    async fn list_processable(&self, limit: i64) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status IN (?, ?) LIMIT ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Failed.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list_processable")
        .map_err(StoreError::Io)?;
        Ok(rows.into_iter().map(Task::from).collect())
    }
}
