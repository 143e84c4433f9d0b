//! notifyd — durable, at-least-once notification dispatch daemon.
//!
//! Wires the store, queue, and deliverer into a worker pool, a retry
//! scheduler, and an HTTP intake/replay surface, then runs them until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use notifyd::config::DaemonConfig;
use notifyd::deliver::logging::LoggingDeliverer;
use notifyd::deliver::Deliver;
use notifyd::intake::EventRequest;
use notifyd::queue::memory::InMemoryQueue;
use notifyd::queue::Queue;
use notifyd::scheduler::RetryScheduler;
use notifyd::store::sqlite::SqliteStore;
use notifyd::store::Store;
use notifyd::worker::Worker;
use notifyd::AppContext;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "notifyd", about = "Durable, at-least-once notification dispatch daemon", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP bind port for the intake/replay/listing surface.
    #[arg(long, env = "NOTIFYD_PORT")]
    port: Option<u16>,

    /// Directory holding the SQLite database file.
    #[arg(long, env = "NOTIFYD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "NOTIFYD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily), in addition to stdout.
    #[arg(long, env = "NOTIFYD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Identity stamped into claims made by this process.
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Number of parallel worker loops draining MAIN.
    #[arg(long, env = "WORKER_CONCURRENCY")]
    worker_concurrency: Option<usize>,

    /// Partition count for the in-memory queue backend.
    #[arg(long, env = "SCHEDULER_PARTITIONS")]
    scheduler_partitions: Option<usize>,

    /// `From:` address stamped on outgoing email.
    #[arg(long, env = "SES_FROM_EMAIL")]
    ses_from_email: Option<String>,

    /// Use the real Kafka transport instead of the default in-memory queue.
    /// Requires the `kafka` feature.
    #[arg(long)]
    kafka: bool,

    /// CSV of Kafka broker endpoints.
    #[arg(long, env = "KAFKA_BROKERS")]
    kafka_brokers: Option<String>,

    #[arg(long, env = "KAFKA_TOPIC_MAIN")]
    kafka_topic_main: Option<String>,

    #[arg(long, env = "KAFKA_TOPIC_RETRY")]
    kafka_topic_retry: Option<String>,

    #[arg(long, env = "KAFKA_GROUP_ID")]
    kafka_group_id: Option<String>,

    #[arg(long, env = "KAFKA_SCHEDULER_GROUP")]
    kafka_scheduler_group: Option<String>,

    /// Use the real SMTP transport instead of the logging deliverer.
    /// Requires the `smtp` feature.
    #[arg(long)]
    smtp: bool,

    #[arg(long, env = "SMTP_RELAY")]
    smtp_relay: Option<String>,

    #[arg(long, env = "SMTP_USERNAME")]
    smtp_username: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD")]
    smtp_password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon: HTTP surface, worker pool, and retry scheduler
    /// together. Default when no subcommand is given.
    Serve,
    /// Fire a single test event at the pipeline without starting the HTTP
    /// surface — a convenience for exercising the dispatch path by hand.
    Intake {
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        recipient_email: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        chaos_fail_percent: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref());

    let config = Arc::new(DaemonConfig::new(
        args.port,
        args.data_dir.clone(),
        args.log.clone(),
        args.log_file.clone(),
        args.worker_id.clone(),
        args.worker_concurrency,
        args.scheduler_partitions,
        args.ses_from_email.clone(),
        args.kafka_brokers.clone(),
        args.kafka_topic_main.clone(),
        args.kafka_topic_retry.clone(),
        args.kafka_group_id.clone(),
        args.kafka_scheduler_group.clone(),
        args.kafka,
        args.smtp,
        args.smtp_relay.clone(),
        args.smtp_username.clone(),
        args.smtp_password.clone(),
    ));

    info!(
        data_dir = %config.data_dir.display(),
        port = config.http_port,
        worker_concurrency = config.worker_concurrency,
        "notifyd starting"
    );

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::new(&config.data_dir)
            .await
            .context("failed to open SQLite store")?,
    );

    let queue = build_queue(&config)?;
    let deliver = build_deliverer(&config)?;

    let ctx = Arc::new(AppContext::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&deliver),
    ));

    match args.command.unwrap_or(Command::Serve) {
        Command::Intake {
            event_type,
            entity_id,
            recipient_email,
            priority,
            chaos_fail_percent,
        } => {
            let result = ctx
                .intake
                .submit(EventRequest {
                    event_type,
                    entity_id,
                    recipient_email,
                    priority,
                    chaos_fail_percent,
                })
                .await?;
            println!("task_id={} idempotency_key={}", result.task_id, result.idempotency_key);
            Ok(())
        }
        Command::Serve => run_server(ctx).await,
    }
}

fn build_queue(config: &DaemonConfig) -> Result<Arc<dyn Queue>> {
    if config.use_kafka {
        #[cfg(feature = "kafka")]
        {
            let kafka_config = notifyd::queue::kafka::KafkaConfig {
                brokers: config.kafka_brokers.clone(),
                topic_main: config.kafka_topic_main.clone(),
                topic_retry: config.kafka_topic_retry.clone(),
                group_id: config.kafka_group_id.clone(),
            };
            let kafka = notifyd::queue::kafka::KafkaQueue::new(&kafka_config)
                .context("failed to connect to Kafka")?;
            return Ok(Arc::new(kafka));
        }
        #[cfg(not(feature = "kafka"))]
        {
            anyhow::bail!("--kafka requires the crate to be built with --features kafka");
        }
    }
    Ok(Arc::new(InMemoryQueue::new(config.scheduler_partitions)))
}

fn build_deliverer(config: &DaemonConfig) -> Result<Arc<dyn Deliver>> {
    if config.use_smtp {
        #[cfg(feature = "smtp")]
        {
            let relay = config
                .smtp_relay
                .as_deref()
                .context("--smtp requires --smtp-relay / SMTP_RELAY")?;
            let username = config.smtp_username.as_deref().unwrap_or_default();
            let password = config.smtp_password.as_deref().unwrap_or_default();
            let smtp = notifyd::deliver::smtp::SmtpDeliverer::new(relay, username, password, &config.ses_from_email)
                .map_err(|e| anyhow::anyhow!("failed to configure SMTP deliverer: {e}"))?;
            return Ok(Arc::new(smtp));
        }
        #[cfg(not(feature = "smtp"))]
        {
            anyhow::bail!("--smtp requires the crate to be built with --features smtp");
        }
    }
    Ok(Arc::new(LoggingDeliverer::new(config.ses_from_email.clone())))
}

async fn run_server(ctx: Arc<AppContext>) -> Result<()> {
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for i in 0..ctx.config.worker_concurrency {
        let worker_id = format!("{}-{}", ctx.config.worker_id, i);
        let worker = Worker::new(
            worker_id,
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.queue),
            Arc::clone(&ctx.deliver),
        );
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { worker.run(cancel).await }));
    }

    let scheduler = RetryScheduler::new(Arc::clone(&ctx.queue));
    let scheduler_cancel = cancel.clone();
    handles.push(tokio::spawn(async move { scheduler.run(scheduler_cancel).await }));

    let http_ctx = Arc::clone(&ctx);
    let http_port = ctx.config.http_port;
    let http_handle = tokio::spawn(async move {
        if let Err(e) = notifyd::rest::serve(http_ctx, http_port).await {
            warn!(err = %e, "HTTP surface exited with error");
        }
    });

    make_shutdown_future().await;
    info!("shutdown signal received — draining in-flight work");
    cancel.cancel();
    http_handle.abort();

    for handle in handles {
        let _ = handle.await;
    }

    info!("notifyd stopped");
    Ok(())
}

/// Resolves when a shutdown signal is received. SIGTERM and Ctrl-C on Unix;
/// Ctrl-C only elsewhere.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Initializes the tracing subscriber. If `log_file` is set, logs go to both
/// stdout and a daily-rolling file. Returns a `WorkerGuard` that must stay
/// alive for the process lifetime. Falls back to stdout-only on a bad log
/// path rather than panicking.
fn setup_logging(log_level: &str, log_file: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("notifyd.log"));

        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(log_level))
            .with(tracing_subscriber::fmt::layer().compact())
            .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
            .init();

        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
