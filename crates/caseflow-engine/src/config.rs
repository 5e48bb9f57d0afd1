//! Configuration management
//!
//! Every tunable policy value (error budget, backoff curve, lock timeouts,
//! poll intervals, per-channel endpoints) is a named constant here rather
//! than a literal at a call site.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::DbConfig;
use crate::retry::RetryPolicy;

// ============================================================================
// Queue Constants
// ============================================================================

/// Default interval between claim attempts when the queue is empty.
pub const DEFAULT_QUEUE_POLL_INTERVAL_SECS: u64 = 5;

/// Default number of concurrent queue workers per process.
pub const DEFAULT_QUEUE_WORKER_COUNT: usize = 4;

/// Default interval between worker heartbeat upserts.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default attempt budget for a job.
pub const DEFAULT_JOB_MAX_ATTEMPTS: i32 = 5;

/// Default base delay for job retry backoff.
pub const DEFAULT_JOB_RETRY_BASE_SECS: u64 = 30;

/// Default cap for job retry backoff.
pub const DEFAULT_JOB_RETRY_MAX_SECS: u64 = 3600;

/// How long a claimed job may go without completing before the reaper
/// treats its worker as crashed. Reclaim latency trades against
/// false-positive reclaims of slow-but-alive work.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;

/// Jobs still pending after this many hours indicate systemic failure and
/// are failed by the reaper rather than left to rot silently.
pub const DEFAULT_PENDING_CEILING_HOURS: i64 = 24;

/// Default interval between reaper sweeps.
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Outbox Constants
// ============================================================================

/// Default interval between outbox polls when no messages are pending.
pub const DEFAULT_OUTBOX_POLL_INTERVAL_SECS: u64 = 2;

/// Default number of messages claimed per poll.
pub const DEFAULT_OUTBOX_BATCH_SIZE: i64 = 20;

/// Default attempt budget for an outbox message.
pub const DEFAULT_OUTBOX_MAX_ATTEMPTS: i32 = 5;

/// Default base delay for delivery retry backoff.
pub const DEFAULT_OUTBOX_RETRY_BASE_SECS: u64 = 10;

/// Default cap for delivery retry backoff.
pub const DEFAULT_OUTBOX_RETRY_MAX_SECS: u64 = 900;

/// How long a claimed message may sit in `processing` before the reaper
/// returns it to the pending set.
pub const DEFAULT_OUTBOX_LOCK_TIMEOUT_SECS: u64 = 300;

/// Default timeout for a single channel delivery request.
pub const DEFAULT_CHANNEL_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Ingest Constants
// ============================================================================

/// Default share of rows (percent) that may fail validation before the
/// whole batch is rolled back.
pub const DEFAULT_ERROR_BUDGET_PCT: f64 = 10.0;

// ============================================================================
// Reconciliation Constants
// ============================================================================

/// Default interval between reconciliation sweeps.
pub const DEFAULT_RECONCILE_SWEEP_INTERVAL_SECS: u64 = 300;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub queue: QueueConfig,
    pub outbox: OutboxConfig,
    pub ingest: IngestConfig,
    pub reconcile: ReconcileConfig,
}

/// Job queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub poll_interval_secs: u64,
    pub worker_count: usize,
    pub heartbeat_interval_secs: u64,
    pub max_attempts: i32,
    pub retry: RetryPolicy,
    /// Claim lock timeout; the reaper reclaims `processing` jobs whose
    /// `locked_at` predates now minus this value.
    pub lock_timeout: Duration,
    pub pending_ceiling_hours: i64,
    pub reap_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_QUEUE_POLL_INTERVAL_SECS,
            worker_count: DEFAULT_QUEUE_WORKER_COUNT,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            max_attempts: DEFAULT_JOB_MAX_ATTEMPTS,
            retry: RetryPolicy::exponential(
                DEFAULT_JOB_MAX_ATTEMPTS,
                Duration::from_secs(DEFAULT_JOB_RETRY_BASE_SECS),
                Duration::from_secs(DEFAULT_JOB_RETRY_MAX_SECS),
            ),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            pending_ceiling_hours: DEFAULT_PENDING_CEILING_HOURS,
            reap_interval_secs: DEFAULT_REAP_INTERVAL_SECS,
        }
    }
}

/// Outbox processor configuration
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub retry: RetryPolicy,
    pub lock_timeout: Duration,
    pub request_timeout: Duration,
    pub channels: ChannelEndpoints,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_OUTBOX_POLL_INTERVAL_SECS,
            batch_size: DEFAULT_OUTBOX_BATCH_SIZE,
            max_attempts: DEFAULT_OUTBOX_MAX_ATTEMPTS,
            retry: RetryPolicy::exponential(
                DEFAULT_OUTBOX_MAX_ATTEMPTS,
                Duration::from_secs(DEFAULT_OUTBOX_RETRY_BASE_SECS),
                Duration::from_secs(DEFAULT_OUTBOX_RETRY_MAX_SECS),
            ),
            lock_timeout: Duration::from_secs(DEFAULT_OUTBOX_LOCK_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_CHANNEL_REQUEST_TIMEOUT_SECS),
            channels: ChannelEndpoints::default(),
        }
    }
}

/// Per-channel delivery endpoints.
///
/// A channel without a configured endpoint is reported as not implemented
/// at dispatch time; webhook and external-API targets come from the message
/// payload itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelEndpoints {
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub email_gateway_url: Option<String>,
    pub sms_gateway_url: Option<String>,
    pub pdf_render_url: Option<String>,
}

/// Ingest pipeline configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Percentage of rows allowed to fail validation before the batch is
    /// rolled back as a whole.
    pub error_budget_pct: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            error_budget_pct: DEFAULT_ERROR_BUDGET_PCT,
        }
    }
}

/// Reconciliation engine configuration
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub sweep_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: DEFAULT_RECONCILE_SWEEP_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut queue = QueueConfig {
            poll_interval_secs: env_parse("QUEUE_POLL_INTERVAL", DEFAULT_QUEUE_POLL_INTERVAL_SECS),
            worker_count: env_parse("QUEUE_WORKER_COUNT", DEFAULT_QUEUE_WORKER_COUNT),
            heartbeat_interval_secs: env_parse(
                "QUEUE_HEARTBEAT_INTERVAL",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            ),
            max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", DEFAULT_JOB_MAX_ATTEMPTS),
            lock_timeout: Duration::from_secs(env_parse(
                "QUEUE_LOCK_TIMEOUT",
                DEFAULT_LOCK_TIMEOUT_SECS,
            )),
            pending_ceiling_hours: env_parse("QUEUE_PENDING_CEILING", DEFAULT_PENDING_CEILING_HOURS),
            reap_interval_secs: env_parse("QUEUE_REAP_INTERVAL", DEFAULT_REAP_INTERVAL_SECS),
            ..QueueConfig::default()
        };
        queue.retry.max_attempts = queue.max_attempts;

        let mut outbox = OutboxConfig {
            poll_interval_secs: env_parse(
                "OUTBOX_POLL_INTERVAL",
                DEFAULT_OUTBOX_POLL_INTERVAL_SECS,
            ),
            batch_size: env_parse("OUTBOX_BATCH_SIZE", DEFAULT_OUTBOX_BATCH_SIZE),
            max_attempts: env_parse("OUTBOX_MAX_ATTEMPTS", DEFAULT_OUTBOX_MAX_ATTEMPTS),
            lock_timeout: Duration::from_secs(env_parse(
                "OUTBOX_LOCK_TIMEOUT",
                DEFAULT_OUTBOX_LOCK_TIMEOUT_SECS,
            )),
            request_timeout: Duration::from_secs(env_parse(
                "CHANNEL_REQUEST_TIMEOUT",
                DEFAULT_CHANNEL_REQUEST_TIMEOUT_SECS,
            )),
            channels: ChannelEndpoints {
                slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok(),
                discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok(),
                email_gateway_url: std::env::var("EMAIL_GATEWAY_URL").ok(),
                sms_gateway_url: std::env::var("SMS_GATEWAY_URL").ok(),
                pdf_render_url: std::env::var("PDF_RENDER_URL").ok(),
            },
            ..OutboxConfig::default()
        };
        outbox.retry.max_attempts = outbox.max_attempts;

        let config = Config {
            database: DbConfig::from_env()
                .map_err(|e| anyhow::anyhow!("Database configuration invalid: {}", e))?,
            queue,
            outbox,
            ingest: IngestConfig {
                error_budget_pct: env_parse("INGEST_ERROR_BUDGET_PCT", DEFAULT_ERROR_BUDGET_PCT),
            },
            reconcile: ReconcileConfig {
                sweep_interval_secs: env_parse(
                    "RECONCILE_SWEEP_INTERVAL",
                    DEFAULT_RECONCILE_SWEEP_INTERVAL_SECS,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.queue.worker_count == 0 {
            anyhow::bail!("Queue worker_count must be greater than 0");
        }

        if self.queue.max_attempts < 1 {
            anyhow::bail!("Queue max_attempts must be at least 1");
        }

        if self.outbox.batch_size < 1 {
            anyhow::bail!("Outbox batch_size must be at least 1");
        }

        if self.outbox.max_attempts < 1 {
            anyhow::bail!("Outbox max_attempts must be at least 1");
        }

        if !(0.0..=100.0).contains(&self.ingest.error_budget_pct) {
            anyhow::bail!(
                "Ingest error_budget_pct must be between 0 and 100, got {}",
                self.ingest.error_budget_pct
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DbConfig::default(),
            queue: QueueConfig::default(),
            outbox: OutboxConfig::default(),
            ingest: IngestConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_error_budget_bounds() {
        let mut config = Config::default();
        config.ingest.error_budget_pct = 150.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.queue.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_retry_matches_attempt_budget() {
        let config = Config::default();
        assert_eq!(config.queue.retry.max_attempts, config.queue.max_attempts);
        assert_eq!(config.outbox.retry.max_attempts, config.outbox.max_attempts);
    }
}
