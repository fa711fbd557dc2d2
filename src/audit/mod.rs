//! Append-only audit trail, standing alerts and secret redaction.

mod alerts;
mod entry;
mod logger;
pub mod scrub;

pub use alerts::{AUTHENTICATION_FAILING, Alert, AlertBoard, RESTART_BUDGET_EXHAUSTED};
pub use entry::AuditEntry;
pub use logger::AuditLogger;

/// Actor recorded for human-initiated transitions.
pub const ACTOR_HUMAN: &str = "human";
