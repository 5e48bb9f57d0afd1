//! Common test utilities for engine integration tests using testcontainers
//!
//! Spins up a PostgreSQL container with migrations pre-applied, so each
//! test exercises the real store with full isolation.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     sqlx::query("SELECT 1").execute(pg.pool()).await.expect("Query failed");
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

use caseflow_engine::audit::AuditSink;
use caseflow_engine::config::QueueConfig;
use caseflow_engine::queue::JobQueue;
use caseflow_engine::retry::RetryPolicy;

/// PostgreSQL test container wrapper with migrations applied
pub struct TestPostgres {
    // Held so the container lives as long as the pool does.
    container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&conn_string)
            .await
            .context("Failed to connect to test PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { container, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,caseflow_engine=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Queue configured for fast tests: no retry delay, tight polling.
pub fn test_queue(pool: &PgPool) -> JobQueue {
    test_queue_with_attempts(pool, 5)
}

pub fn test_queue_with_attempts(pool: &PgPool, max_attempts: i32) -> JobQueue {
    let config = QueueConfig {
        poll_interval_secs: 1,
        max_attempts,
        retry: RetryPolicy::fixed(max_attempts, std::time::Duration::ZERO),
        ..QueueConfig::default()
    };
    JobQueue::new(pool.clone(), AuditSink::noop(), config)
}
