//! Criterion benchmarks for hot paths in notifyd.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - idempotency key formatting and backoff lookup (pure functions, called
//!     once per task lifecycle event)
//!   - SqliteStore put_task / claim_task against an in-memory database (the
//!     per-message path every worker and the intake publisher go through)

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use notifyd::model::{backoff_ms, idempotency_key, Task, TaskStatus, CHANNEL_EMAIL, DEFAULT_MAX_ATTEMPTS};
use notifyd::store::sqlite::SqliteStore;
use notifyd::store::Store;
use tokio::runtime::Runtime;

fn bench_idempotency_key(c: &mut Criterion) {
    c.bench_function("idempotency_key_format", |b| {
        b.iter(|| {
            let key = idempotency_key(
                black_box("ticket_escalated"),
                black_box("TICKET-1234"),
                black_box(CHANNEL_EMAIL),
                black_box("customer@example.com"),
            );
            black_box(key);
        });
    });
}

fn bench_backoff_lookup(c: &mut Criterion) {
    c.bench_function("backoff_ms_lookup", |b| {
        b.iter(|| {
            for attempt in 1..=5 {
                black_box(backoff_ms(black_box(attempt)));
            }
        });
    });
}

fn sample_task(id: &str) -> Task {
    let now = 1_700_000_000_000;
    Task {
        task_id: id.to_string(),
        idempotency_key: idempotency_key("ticket_escalated", "TICKET-1", CHANNEL_EMAIL, "a@b.com"),
        event_type: "ticket_escalated".into(),
        entity_id: "TICKET-1".into(),
        channel: CHANNEL_EMAIL.into(),
        recipient_email: "a@b.com".into(),
        priority: "HIGH".into(),
        status: TaskStatus::Pending.as_str().into(),
        attempt_count: 0,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
        last_error: String::new(),
        chaos_fail_percent: 0,
        worker_id: None,
        processing_started_at: None,
        next_retry_at: 0,
        created_at: now,
        updated_at: now,
    }
}

fn bench_sqlite_put_task(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = rt.block_on(SqliteStore::in_memory()).unwrap();
    let mut counter = 0u64;

    c.bench_function("sqlite_put_task", |b| {
        b.iter(|| {
            counter += 1;
            let task = sample_task(&format!("bench-{counter}"));
            rt.block_on(store.put_task(black_box(&task))).unwrap();
        });
    });
}

fn bench_sqlite_claim_task(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = rt.block_on(SqliteStore::in_memory()).unwrap();
    let mut counter = 0u64;

    c.bench_function("sqlite_claim_task", |b| {
        b.iter_with_setup(
            || {
                counter += 1;
                let id = format!("claim-bench-{counter}");
                rt.block_on(store.put_task(&sample_task(&id))).unwrap();
                id
            },
            |id| {
                let outcome = rt
                    .block_on(store.claim_task(black_box(&id), "bench-worker", 1_700_000_000_000))
                    .unwrap();
                black_box(outcome);
            },
        );
    });
}

criterion_group!(
    benches,
    bench_idempotency_key,
    bench_backoff_lookup,
    bench_sqlite_put_task,
    bench_sqlite_claim_task
);
criterion_main!(benches);
