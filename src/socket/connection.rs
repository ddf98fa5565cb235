//! Per-connection handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLogger};
use crate::auth::RequestVerifier;
use crate::config::Settings;
use crate::error::{ProtocolErrorKind, ServiceError};
use crate::protocol::{Envelope, Framing, Response, HEADER_USER_ID};

use super::ConnectionMetrics;

/// Handle a single client connection until it closes or times out.
pub async fn handle_connection(
    stream: UnixStream,
    settings: Arc<Settings>,
    verifier: Arc<RequestVerifier>,
    audit_logger: Option<Arc<AuditLogger>>,
    metrics: Arc<ConnectionMetrics>,
) -> Result<(), ServiceError> {
    let framing = Framing::new(
        settings.limits.max_message_size,
        Duration::from_secs(settings.limits.socket_timeout_seconds),
    );
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let result = process_request(
            &mut reader,
            &mut writer,
            &framing,
            &verifier,
            audit_logger.as_deref(),
            &metrics,
        )
        .await;

        match result {
            Ok(()) => continue,
            Err(ServiceError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(ServiceError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout,
            }) => {
                warn!("Connection timed out");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read, authenticate and answer one envelope.
async fn process_request<R, W>(
    reader: &mut R,
    writer: &mut W,
    framing: &Framing,
    verifier: &RequestVerifier,
    audit_logger: Option<&AuditLogger>,
    metrics: &ConnectionMetrics,
) -> Result<(), ServiceError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request_id = Uuid::new_v4();

    let envelope: Envelope = match framing.read_json(reader).await {
        Ok(envelope) => envelope,
        Err(e @ ServiceError::Protocol {
            kind: ProtocolErrorKind::InvalidMessageFormat { .. },
        }) => {
            warn!(request_id = %request_id, error = %e, "Unreadable envelope");
            metrics.record_request(false);
            return framing
                .write_json(writer, &Response::from_error(request_id, &e))
                .await;
        }
        Err(e) => return Err(e),
    };

    let start_time = Instant::now();
    let principal = envelope.headers.get(HEADER_USER_ID).map(str::to_string);
    info!(
        request_id = %request_id,
        principal = principal.as_deref().unwrap_or("<none>"),
        body_bytes = envelope.body_bytes().len(),
        "Received request"
    );

    // The raw body goes to the verifier before anything else looks at it.
    let outcome = verifier.verify(&envelope.headers, envelope.body_bytes());
    let duration_ms = start_time.elapsed().as_millis() as u64;

    let (response, entry) = match outcome {
        Ok(verified) => {
            info!(
                request_id = %request_id,
                principal = %verified.principal,
                "Request accepted"
            );
            let data = serde_json::json!({
                "principal": verified.principal,
                "nonce": verified.nonce,
                "timestamp_ms": verified.timestamp_ms,
                "body_digest": verified.body_digest.to_hex(),
            });
            let entry = AuditEntry::accepted(request_id, &verified, duration_ms);
            (Response::success_with_id(request_id, data), entry)
        }
        Err(e) => {
            let entry = AuditEntry::rejected(request_id, principal, &e, duration_ms);
            (Response::from_error(request_id, &e), entry)
        }
    };

    metrics.record_request(response.success);
    if let Some(logger) = audit_logger {
        if let Err(e) = logger.log(&entry) {
            error!(error = %e, "Failed to write audit log entry");
        }
    }

    framing.write_json(writer, &response).await
}
