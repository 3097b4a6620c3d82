//! PayGuard Velocity Guard - rate-based circuit breaker
//!
//! On every settlement the guard computes trailing spend over the last 60
//! seconds and over the current UTC calendar day, compares each window
//! against its configured soft/hard limits, and escalates the agent's
//! status accordingly:
//!
//! - any hard limit exceeded -> `red` (frozen)
//! - else any soft limit exceeded -> `yellow` (throttled)
//!
//! Escalation is the only automatic transition. Improvement (`yellow` or
//! `red` back to `green`) happens solely through `reset_status`, which
//! requires an elevated caller and a reason - there is no code path that
//! lowers a status from evaluation, so silent auto-recovery is
//! unrepresentable.

pub mod error;
pub mod guard;
pub mod window;

pub use error::VelocityError;
pub use guard::{Evaluation, StatusChanged, VelocityGuard, VelocityLimits};
pub use window::SpendWindow;
