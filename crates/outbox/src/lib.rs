//! PayGuard Outbox - durable notification delivery
//!
//! Status-changed events are not fire-and-forget: they are persisted as
//! pending outbox rows in the same process that produced them, and a drain
//! loop delivers them to a `NotificationSink` with bounded retry and
//! backoff. Rows that exhaust their attempts are marked `failed` and stay
//! observable; nothing is silently dropped.
//!
//! Delivery is at-least-once: a crash between a successful sink call and
//! the row update causes a redelivery on the next drain. Consumers are
//! assumed idempotent (the payload carries the agent id and both statuses,
//! which is enough to dedup). This assumption is deliberate - losing a
//! freeze notification is worse than repeating one.

pub mod error;
pub mod outbox;
pub mod sink;

pub use error::OutboxError;
pub use outbox::{DeliveryStatus, DrainReport, Outbox, OutboxEntry, RetryPolicy};
pub use sink::{LogSink, NotificationSink, SinkError};
