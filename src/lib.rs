pub mod config;
pub mod deliver;
pub mod intake;
pub mod model;
pub mod queue;
pub mod rest;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker;

use std::sync::Arc;

use config::DaemonConfig;
use deliver::Deliver;
use intake::IntakePublisher;
use queue::Queue;
use store::Store;

/// Current time as epoch milliseconds — the timestamp unit used throughout
/// the task record and the wire formats.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared application state passed to every HTTP handler and background
/// loop.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub deliver: Arc<dyn Deliver>,
    pub intake: Arc<IntakePublisher>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(
        config: Arc<DaemonConfig>,
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        deliver: Arc<dyn Deliver>,
    ) -> Self {
        let intake = Arc::new(IntakePublisher::new(Arc::clone(&store), Arc::clone(&queue)));
        AppContext {
            config,
            store,
            queue,
            deliver,
            intake,
            started_at: std::time::Instant::now(),
        }
    }
}
