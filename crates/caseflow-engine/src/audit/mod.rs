//! Lifecycle audit trail
//!
//! Every state transition in the Job, Outbox, and ImportRun lifecycles is
//! recorded as a structured event keyed by correlation id. Recording is
//! fire-and-forget: callers hand events to an [`AuditSink`] backed by an
//! unbounded channel and never block on the write.
//!
//! The sink is an explicit, injected component with a documented lifecycle
//! (`start` / `shutdown`), not a module-level singleton.

mod models;
mod queries;
mod sink;

pub use models::{AuditDomain, AuditEvent, StoredAuditEvent};
pub use queries::{insert_event, recent_events};
pub use sink::AuditSink;
