//! Audit entry types.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::VerifiedRequest;
use crate::error::ServiceError;

/// A single audit log entry for one verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp when the request was verified.
    pub timestamp: String,
    /// Unique identifier for the request.
    pub request_id: Uuid,
    /// Claimed principal, if the request carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Verification outcome.
    pub outcome: AuditOutcome,
    /// Verification duration in milliseconds.
    pub duration_ms: u64,
}

impl AuditEntry {
    /// Entry for an accepted request.
    pub fn accepted(request_id: Uuid, verified: &VerifiedRequest, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            request_id,
            principal: Some(verified.principal.clone()),
            outcome: AuditOutcome::Accepted {
                nonce: verified.nonce.clone(),
            },
            duration_ms,
        }
    }

    /// Entry for a rejected request.
    pub fn rejected(
        request_id: Uuid,
        principal: Option<String>,
        error: &ServiceError,
        duration_ms: u64,
    ) -> Self {
        let reason = error
            .auth_kind()
            .map(|kind| kind.reason_code())
            .unwrap_or("internal");
        Self {
            timestamp: Utc::now().to_rfc3339(),
            request_id,
            principal,
            outcome: AuditOutcome::Rejected {
                reason: reason.to_string(),
                detail: error.to_string(),
            },
            duration_ms,
        }
    }
}

/// Result of a verification attempt for audit purposes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// All checks passed; the nonce is consumed.
    Accepted { nonce: String },
    /// A check failed.
    Rejected {
        /// Stable reason code.
        reason: String,
        /// Full error text.
        detail: String,
    },
}
