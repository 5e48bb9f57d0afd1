//! Outbox polling and delivery
//!
//! Claims batches of pending messages with the same skip-locked discipline
//! as the job queue, dispatches each to its channel sender outside any
//! transaction, and records the outcome in a second short statement. Locks
//! are never held across network I/O.

use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditDomain, AuditEvent, AuditSink};
use crate::config::{OutboxConfig, DEFAULT_OUTBOX_MAX_ATTEMPTS};
use crate::error::EngineResult;

use super::models::{DeliveryStats, OutboxDepth, OutboxMessage, SendOutcome, SideEffect};
use super::senders::SenderRegistry;

/// Enqueue a side effect within the caller's transaction.
///
/// This is the only way messages enter the outbox: the insert commits with
/// the business mutation that requires the side effect, or not at all.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    effect: &SideEffect,
    correlation_id: Option<Uuid>,
) -> EngineResult<Uuid> {
    effect.validate()?;

    let payload = serde_json::to_value(effect)
        .map_err(caseflow_common::CaseflowError::Serialization)
        .map_err(crate::error::EngineError::Common)?;

    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO outbox_messages (channel, payload, status, max_attempts, correlation_id)
        VALUES ($1, $2, 'pending', $3, $4)
        RETURNING id
        "#,
    )
    .bind(effect.channel().as_str())
    .bind(&payload)
    .bind(DEFAULT_OUTBOX_MAX_ATTEMPTS)
    .bind(correlation_id)
    .fetch_one(&mut **tx)
    .await?;

    debug!(message_id = %id, channel = %effect.channel(), "Side effect enqueued");
    Ok(id)
}

/// Poller that drains the outbox
pub struct OutboxProcessor {
    pool: PgPool,
    senders: SenderRegistry,
    audit: AuditSink,
    config: OutboxConfig,
    worker_id: String,
    hostname: String,
}

impl OutboxProcessor {
    pub fn new(pool: PgPool, senders: SenderRegistry, audit: AuditSink, config: OutboxConfig) -> Self {
        Self {
            pool,
            senders,
            audit,
            config,
            worker_id: format!("outbox-{}", Uuid::new_v4()),
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Claim a batch of pending messages and deliver them.
    ///
    /// The claim statement commits immediately, so no row lock survives
    /// into the dispatch phase; a crashed processor leaves messages in
    /// `processing` for the reaper's outbox counterpart (lock timeout) to
    /// reclaim.
    pub async fn process_once(&self) -> EngineResult<DeliveryStats> {
        let claimed = sqlx::query_as::<_, OutboxMessage>(
            r#"
            UPDATE outbox_messages
            SET status = 'processing', locked_at = NOW(), locked_by = $1,
                attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE status = 'pending' AND run_at <= NOW()
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            RETURNING id, channel, payload, status, attempts, max_attempts, run_at,
                      locked_at, locked_by, last_error, correlation_id, created_at,
                      delivered_at
            "#,
        )
        .bind(&self.worker_id)
        .bind(self.config.batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = DeliveryStats {
            claimed: claimed.len() as u64,
            ..DeliveryStats::default()
        };

        for message in claimed {
            let outcome = self.dispatch(&message).await;
            self.record_outcome(&message, outcome, &mut stats).await?;
        }

        Ok(stats)
    }

    async fn dispatch(&self, message: &OutboxMessage) -> SendOutcome {
        let effect = match message.side_effect() {
            Ok(effect) => effect,
            // An undecodable payload can never deliver; retrying is pointless.
            Err(e) => return SendOutcome::Permanent(e.to_string()),
        };

        let Some(sender) = self.senders.get(effect.channel()) else {
            return SendOutcome::NotImplemented;
        };

        debug!(
            message_id = %message.id,
            channel = %message.channel,
            attempt = message.attempts,
            "Dispatching outbox message"
        );

        sender.send(message.id, &effect).await
    }

    async fn record_outcome(
        &self,
        message: &OutboxMessage,
        outcome: SendOutcome,
        stats: &mut DeliveryStats,
    ) -> EngineResult<()> {
        match outcome {
            SendOutcome::Delivered => {
                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET status = 'delivered', delivered_at = NOW(),
                        locked_at = NULL, locked_by = NULL, last_error = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(message.id)
                .execute(&self.pool)
                .await?;

                stats.delivered += 1;
                info!(message_id = %message.id, channel = %message.channel, "Message delivered");
                self.audit.record(
                    AuditEvent::new(
                        AuditDomain::Outbox,
                        "delivery",
                        "delivered",
                        message.correlation(),
                    )
                    .with_metadata(json!({
                        "message_id": message.id,
                        "channel": message.channel,
                        "attempts": message.attempts,
                    })),
                );
            },
            SendOutcome::Retryable(reason) if message.attempts < message.max_attempts => {
                let delay = self.config.retry.delay_for_attempt(message.attempts);
                let next_run = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(0));

                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET status = 'pending', run_at = $2, last_error = $3,
                        locked_at = NULL, locked_by = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(message.id)
                .bind(next_run)
                .bind(&reason)
                .execute(&self.pool)
                .await?;

                stats.rescheduled += 1;
                debug!(
                    message_id = %message.id,
                    attempt = message.attempts,
                    reason = %reason,
                    "Delivery failed, retry scheduled"
                );
                self.audit.record(
                    AuditEvent::new(
                        AuditDomain::Outbox,
                        "delivery",
                        "retry_scheduled",
                        message.correlation(),
                    )
                    .with_metadata(json!({
                        "message_id": message.id,
                        "attempts": message.attempts,
                        "error": reason,
                    })),
                );
            },
            outcome => {
                let reason = match outcome {
                    SendOutcome::Retryable(reason) => {
                        format!("retry budget exhausted: {}", reason)
                    },
                    SendOutcome::Permanent(reason) => reason,
                    SendOutcome::NotImplemented => {
                        format!("no delivery handler configured for channel '{}'", message.channel)
                    },
                    SendOutcome::Delivered => unreachable!("delivered handled above"),
                };

                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET status = 'dead_letter', last_error = $2,
                        locked_at = NULL, locked_by = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(message.id)
                .bind(&reason)
                .execute(&self.pool)
                .await?;

                stats.dead_lettered += 1;
                warn!(
                    message_id = %message.id,
                    channel = %message.channel,
                    attempts = message.attempts,
                    reason = %reason,
                    "Message dead-lettered"
                );
                self.audit.record(
                    AuditEvent::new(
                        AuditDomain::Outbox,
                        "delivery",
                        "dead_letter",
                        message.correlation(),
                    )
                    .with_metadata(json!({
                        "message_id": message.id,
                        "attempts": message.attempts,
                        "error": reason,
                    })),
                );
            },
        }

        Ok(())
    }

    /// Return expired `processing` claims to the pending set.
    ///
    /// The outbox counterpart of the queue reaper: a processor that died
    /// between claim and outcome leaves its messages locked; once the lock
    /// timeout elapses they become claimable again. Attempt counters were
    /// already incremented at claim time, so redelivery still converges on
    /// the dead-letter budget.
    pub async fn reap_expired_claims(&self) -> EngineResult<u64> {
        let lock_timeout_secs = self.config.lock_timeout.as_secs() as i64;

        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = CASE WHEN attempts >= max_attempts THEN 'dead_letter' ELSE 'pending' END,
                last_error = $2,
                locked_at = NULL, locked_by = NULL
            WHERE status = 'processing'
              AND locked_at < NOW() - ($1 * INTERVAL '1 second')
            "#,
        )
        .bind(lock_timeout_secs)
        .bind(format!(
            "reclaimed: processor lock expired after {}s",
            lock_timeout_secs
        ))
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed expired outbox claims");
        }

        Ok(reclaimed)
    }

    /// Poll until shutdown is signalled.
    pub async fn process_loop(&self, mut shutdown: watch::Receiver<bool>) -> EngineResult<()> {
        info!(worker_id = %self.worker_id, "Outbox processor started");

        let mut last_reap = std::time::Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.heartbeat().await;

            if last_reap.elapsed() >= self.config.lock_timeout {
                if let Err(e) = self.reap_expired_claims().await {
                    warn!(error = %e, "Failed to reclaim expired outbox claims");
                }
                last_reap = std::time::Instant::now();
            }

            match self.process_once().await {
                Ok(stats) if stats.claimed > 0 => continue,
                Ok(_) => {
                    let sleep = tokio::time::sleep(std::time::Duration::from_secs(
                        self.config.poll_interval_secs,
                    ));
                    tokio::select! {
                        _ = sleep => {}
                        _ = shutdown.changed() => {}
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Outbox round failed");
                    tokio::time::sleep(std::time::Duration::from_secs(
                        self.config.poll_interval_secs,
                    ))
                    .await;
                },
            }
        }

        info!(worker_id = %self.worker_id, "Outbox processor stopped");
        Ok(())
    }

    async fn heartbeat(&self) {
        let result = sqlx::query(
            r#"
            INSERT INTO worker_heartbeats (worker_id, worker_type, hostname, status, last_seen_at)
            VALUES ($1, 'outbox', $2, 'alive', NOW())
            ON CONFLICT (worker_id) DO UPDATE
            SET hostname = EXCLUDED.hostname, status = 'alive', last_seen_at = NOW()
            "#,
        )
        .bind(&self.worker_id)
        .bind(&self.hostname)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(worker_id = %self.worker_id, error = %e, "Outbox heartbeat failed");
        }
    }

    /// Dead-lettered messages awaiting operator attention, newest first.
    pub async fn dead_letters(&self, limit: i64) -> EngineResult<Vec<OutboxMessage>> {
        let messages = sqlx::query_as::<_, OutboxMessage>(
            r#"
            SELECT id, channel, payload, status, attempts, max_attempts, run_at,
                   locked_at, locked_by, last_error, correlation_id, created_at,
                   delivered_at
            FROM outbox_messages
            WHERE status = 'dead_letter'
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Outbox depth per channel and status, for operator dashboards.
    pub async fn depth(&self) -> EngineResult<Vec<OutboxDepth>> {
        let rows = sqlx::query_as::<_, OutboxDepth>(
            r#"
            SELECT channel, status, COUNT(*) AS count
            FROM outbox_messages
            GROUP BY channel, status
            ORDER BY channel, status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Fetch one message by id.
    pub async fn get_message(&self, message_id: Uuid) -> EngineResult<Option<OutboxMessage>> {
        let message = sqlx::query_as::<_, OutboxMessage>(
            r#"
            SELECT id, channel, payload, status, attempts, max_attempts, run_at,
                   locked_at, locked_by, last_error, correlation_id, created_at,
                   delivered_at
            FROM outbox_messages
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::models::OutboxStatus;

    #[test]
    fn test_outbox_status_helper() {
        let message = OutboxMessage {
            id: Uuid::new_v4(),
            channel: "webhook".to_string(),
            payload: json!({}),
            status: "dead_letter".to_string(),
            attempts: 5,
            max_attempts: 5,
            run_at: Utc::now(),
            locked_at: None,
            locked_by: None,
            last_error: None,
            correlation_id: None,
            created_at: Utc::now(),
            delivered_at: None,
        };
        assert_eq!(message.status(), OutboxStatus::DeadLetter);
        assert_eq!(message.correlation(), message.id);
    }
}
