//! Fire-and-forget audit sink

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::models::AuditEvent;
use super::queries::insert_event;

/// Asynchronous writer for the audit trail.
///
/// `record` enqueues the event on an unbounded channel and returns
/// immediately; a background task owns the database writes. Cloning the
/// sink shares the channel. The writer stops once every clone has been
/// dropped; the handle returned by [`AuditSink::start`] can be awaited to
/// drain remaining events during shutdown.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditSink {
    /// Spawn the writer task and return the sink plus its join handle.
    pub fn start(pool: PgPool) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!(
                    domain = %event.domain,
                    stage = %event.stage,
                    event = %event.event,
                    correlation_id = %event.correlation_id,
                    "Audit event"
                );

                if let Err(e) = insert_event(&pool, &event).await {
                    // The trail is best-effort; losing an event must never
                    // fail the operation that emitted it.
                    warn!(
                        error = %e,
                        correlation_id = %event.correlation_id,
                        "Failed to persist audit event"
                    );
                }
            }
        });

        (Self { tx }, handle)
    }

    /// Sink that drops every event. For tests and tooling that do not care
    /// about the trail.
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Record an event without blocking. Events sent after the writer has
    /// stopped are silently discarded.
    pub fn record(&self, event: AuditEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::models::AuditDomain;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_noop_sink_accepts_events() {
        let sink = AuditSink::noop();
        sink.record(AuditEvent::new(
            AuditDomain::Queue,
            "claim",
            "claimed",
            Uuid::new_v4(),
        ));
    }
}
