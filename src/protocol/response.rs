//! Response types for the daemon protocol.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;

/// Authentication failed (any verify-time reason).
pub const CODE_AUTH_ERROR: &str = "AUTH_ERROR";
/// The frame could not be understood.
pub const CODE_PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
/// Anything else.
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Sanitize error messages before sending to clients.
///
/// Every authentication failure gets the same message so a client cannot
/// tell which check rejected it.
fn sanitize_error_message(code: &str) -> &'static str {
    match code {
        CODE_AUTH_ERROR => "Authentication failed",
        CODE_PROTOCOL_ERROR => "Malformed request",
        CODE_INTERNAL_ERROR => "Internal server error",
        _ => "An error occurred",
    }
}

/// A response from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request was authenticated.
    pub success: bool,

    /// Unique identifier for this request/response pair.
    pub request_id: Uuid,

    /// Response data on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error details on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Error details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "AUTH_ERROR").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

impl Response {
    /// Create a success response with a specific request ID.
    pub fn success_with_id(request_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            success: true,
            request_id,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response with a specific request ID.
    ///
    /// The error message is sanitized before being sent to the client to prevent
    /// information disclosure. The original error is logged server-side for debugging.
    pub fn error_with_id(request_id: Uuid, code: &str, original: impl AsRef<str>) -> Self {
        debug!(
            request_id = %request_id,
            code = %code,
            message = %original.as_ref(),
            "Error response (sanitized for client)"
        );

        Self {
            success: false,
            request_id,
            data: None,
            error: Some(ErrorResponse {
                code: code.to_string(),
                message: sanitize_error_message(code).to_string(),
            }),
        }
    }

    /// Map a service error onto its client-facing code.
    pub fn from_error(request_id: Uuid, error: &ServiceError) -> Self {
        let code = match error {
            ServiceError::Auth { .. } => CODE_AUTH_ERROR,
            ServiceError::Protocol { .. } | ServiceError::Serialization(_) => CODE_PROTOCOL_ERROR,
            _ => CODE_INTERNAL_ERROR,
        };
        Self::error_with_id(request_id, code, error.to_string())
    }

    /// The error code, if this is an error response.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorKind, ProtocolErrorKind};

    #[test]
    fn test_success_response() {
        let response = Response::success_with_id(Uuid::nil(), serde_json::json!({"principal": "u1"}));
        assert!(response.success);
        assert!(response.data.is_some());
        assert!(response.error.is_none());

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_auth_failures_are_indistinguishable() {
        let kinds = [
            AuthErrorKind::MissingFields { header: "x-nonce" },
            AuthErrorKind::StaleTimestamp { skew_ms: 10 },
            AuthErrorKind::DigestMismatch,
            AuthErrorKind::SignatureInvalid,
            AuthErrorKind::NonceReplayed,
        ];

        let bodies: Vec<String> = kinds
            .into_iter()
            .map(|kind| {
                let response = Response::from_error(Uuid::nil(), &ServiceError::auth(kind));
                serde_json::to_string(&response.error).unwrap()
            })
            .collect();

        assert!(bodies.windows(2).all(|w| w[0] == w[1]));
        assert!(bodies[0].contains("Authentication failed"));
        assert!(!bodies[0].contains("Nonce"));
    }

    #[test]
    fn test_protocol_error_code() {
        let error = ServiceError::Protocol {
            kind: ProtocolErrorKind::InvalidMessageFormat {
                message: "Invalid JSON: trailing comma".to_string(),
            },
        };
        let response = Response::from_error(Uuid::new_v4(), &error);
        assert_eq!(response.error_code(), Some(CODE_PROTOCOL_ERROR));
        assert_eq!(response.error.unwrap().message, "Malformed request");
    }
}
