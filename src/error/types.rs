//! Error types for reqseal.

use thiserror::Error;

/// Main error type for the crate and the daemon.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Socket-related errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Authentication errors.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// Shorthand for an authentication error of the given kind.
    pub fn auth(kind: AuthErrorKind) -> Self {
        ServiceError::Auth { kind }
    }

    /// The authentication failure kind, if this is one.
    pub fn auth_kind(&self) -> Option<&AuthErrorKind> {
        match self {
            ServiceError::Auth { kind } => Some(kind),
            _ => None,
        }
    }
}

/// Authentication error kinds.
///
/// The verify-time kinds are detailed for logs and audit records only. Clients
/// always see the same generic "Authentication failed" message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    #[error("Missing authentication header: {header}")]
    MissingFields { header: &'static str },

    #[error("Malformed authentication header: {header}")]
    MalformedField { header: &'static str },

    #[error("Stale timestamp: skew {skew_ms}ms exceeds freshness window")]
    StaleTimestamp { skew_ms: u64 },

    #[error("Body digest mismatch")]
    DigestMismatch,

    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("Nonce already used (replay attack detected)")]
    NonceReplayed,

    #[error("Key material error: {message}")]
    KeyMaterial { message: String },

    #[error("Secure random source failed")]
    RandomSource,
}

impl AuthErrorKind {
    /// Stable machine-readable reason, used in audit records.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingFields { .. } => "missing_fields",
            AuthErrorKind::MalformedField { .. } => "malformed_field",
            AuthErrorKind::StaleTimestamp { .. } => "stale_timestamp",
            AuthErrorKind::DigestMismatch => "digest_mismatch",
            AuthErrorKind::SignatureInvalid => "signature_invalid",
            AuthErrorKind::NonceReplayed => "nonce_replayed",
            AuthErrorKind::KeyMaterial { .. } => "key_material",
            AuthErrorKind::RandomSource => "random_source",
        }
    }
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

/// Result type alias for reqseal operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_distinct() {
        let kinds = [
            AuthErrorKind::MissingFields { header: "x-nonce" },
            AuthErrorKind::MalformedField { header: "x-timestamp" },
            AuthErrorKind::StaleTimestamp { skew_ms: 1 },
            AuthErrorKind::DigestMismatch,
            AuthErrorKind::SignatureInvalid,
            AuthErrorKind::NonceReplayed,
            AuthErrorKind::KeyMaterial {
                message: String::new(),
            },
            AuthErrorKind::RandomSource,
        ];
        let mut codes: Vec<_> = kinds.iter().map(|k| k.reason_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_auth_kind_accessor() {
        let err = ServiceError::auth(AuthErrorKind::NonceReplayed);
        assert_eq!(err.auth_kind(), Some(&AuthErrorKind::NonceReplayed));

        let err = ServiceError::Config {
            message: "bad".to_string(),
        };
        assert!(err.auth_kind().is_none());
    }
}
