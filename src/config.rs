//! Daemon configuration, resolved CLI flag > environment variable > default.
//!
//! Every environment variable for the durable-store / queue-transport
//! concerns that this crate actually ships (SQLite, in-memory queue,
//! optional Kafka) is represented here; `DYNAMO_TABLE`, `DYNAMO_ENDPOINT`,
//! and `AWS_REGION` are dropped rather than faked — the concrete store is an
//! opaque key/value contract, and this crate ships SQLite against that
//! contract instead of DynamoDB (recorded in DESIGN.md).

use std::path::PathBuf;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_WORKER_CONCURRENCY: usize = 4;
const DEFAULT_SCHEDULER_PARTITIONS: usize = 4;

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP bind port for the intake/replay/listing surface.
    pub http_port: u16,
    /// Directory holding the SQLite database file.
    pub data_dir: PathBuf,
    /// Log level filter string, e.g. "info", "debug,notifyd=trace".
    pub log: String,
    /// Optional daily-rolling log file path, in addition to stdout.
    pub log_file: Option<PathBuf>,
    /// Identity stamped into claims (`WORKER_ID`).
    pub worker_id: String,
    /// Number of parallel worker loops (`WORKER_CONCURRENCY`, ambient).
    pub worker_concurrency: usize,
    /// Partition count for the in-memory queue backend (`SCHEDULER_PARTITIONS`,
    /// ambient — also used by `KafkaQueue`'s topic layout assumptions).
    pub scheduler_partitions: usize,
    /// Sender identity for delivery (`SES_FROM_EMAIL`); defaulted here so
    /// the crate still runs out of the box against the zero-config
    /// `LoggingDeliverer`.
    pub ses_from_email: String,
    /// CSV of broker endpoints (`KAFKA_BROKERS`); only consulted when the
    /// `kafka` feature is enabled and `--kafka` is passed.
    pub kafka_brokers: String,
    pub kafka_topic_main: String,
    pub kafka_topic_retry: String,
    pub kafka_group_id: String,
    pub kafka_scheduler_group: String,
    pub use_kafka: bool,
    pub use_smtp: bool,
    pub smtp_relay: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
}

impl DaemonConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http_port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        log_file: Option<PathBuf>,
        worker_id: Option<String>,
        worker_concurrency: Option<usize>,
        scheduler_partitions: Option<usize>,
        ses_from_email: Option<String>,
        kafka_brokers: Option<String>,
        kafka_topic_main: Option<String>,
        kafka_topic_retry: Option<String>,
        kafka_group_id: Option<String>,
        kafka_scheduler_group: Option<String>,
        use_kafka: bool,
        use_smtp: bool,
        smtp_relay: Option<String>,
        smtp_username: Option<String>,
        smtp_password: Option<String>,
    ) -> Self {
        DaemonConfig {
            http_port: http_port.unwrap_or(DEFAULT_HTTP_PORT),
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            log: log.unwrap_or_else(|| "info".to_string()),
            log_file,
            worker_id: worker_id.unwrap_or_else(|| "worker-1".to_string()),
            worker_concurrency: worker_concurrency.unwrap_or(DEFAULT_WORKER_CONCURRENCY),
            scheduler_partitions: scheduler_partitions.unwrap_or(DEFAULT_SCHEDULER_PARTITIONS),
            ses_from_email: ses_from_email.unwrap_or_else(|| "notices@example.com".to_string()),
            kafka_brokers: kafka_brokers.unwrap_or_else(|| "localhost:9092".to_string()),
            kafka_topic_main: kafka_topic_main.unwrap_or_else(|| "notifyd-tasks".to_string()),
            kafka_topic_retry: kafka_topic_retry.unwrap_or_else(|| "notifyd-retry".to_string()),
            kafka_group_id: kafka_group_id.unwrap_or_else(|| "notifyd-workers".to_string()),
            kafka_scheduler_group: kafka_scheduler_group
                .unwrap_or_else(|| "notifyd-scheduler".to_string()),
            use_kafka,
            use_smtp,
            smtp_relay,
            smtp_username,
            smtp_password,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_set() {
        let cfg = DaemonConfig::new(
            None, None, None, None, None, None, None, None, None, None, None, None, None, false,
            false, None, None, None,
        );
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(cfg.worker_concurrency, DEFAULT_WORKER_CONCURRENCY);
        assert_eq!(cfg.worker_id, "worker-1");
        assert_eq!(cfg.log, "info");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = DaemonConfig::new(
            Some(9090),
            Some(PathBuf::from("/tmp/x")),
            Some("debug".into()),
            None,
            Some("worker-7".into()),
            Some(16),
            Some(2),
            Some("alerts@example.com".into()),
            None,
            None,
            None,
            None,
            None,
            false,
            false,
            None,
            None,
            None,
        );
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.worker_concurrency, 16);
        assert_eq!(cfg.scheduler_partitions, 2);
        assert_eq!(cfg.ses_from_email, "alerts@example.com");
    }
}
