//! Transactional outbox
//!
//! Side effects are written as outbox rows in the same transaction as the
//! business fact that requires them, then delivered asynchronously by a
//! polling processor. Delivery is at-least-once upstream of the channel
//! handler: the handler must collapse redelivery via the idempotency key it
//! receives.

mod models;
mod processor;
mod senders;

pub use models::{
    Channel, DeliveryStats, OutboxDepth, OutboxMessage, OutboxStatus, SendOutcome, SideEffect,
};
pub use processor::{enqueue, OutboxProcessor};
pub use senders::{classify_status, ChannelSender, SenderRegistry};
