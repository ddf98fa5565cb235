//! Audit logging module.
//!
//! Records the outcome of every verification attempt, including the specific
//! rejection reason that clients never see. Logs are written in JSON lines
//! format for easy parsing by log analysis tools.

mod entry;
mod logger;

pub use entry::{AuditEntry, AuditOutcome};
pub use logger::AuditLogger;
