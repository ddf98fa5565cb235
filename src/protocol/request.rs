//! Request types for the authentication protocol.

use serde::{Deserialize, Serialize};

use crate::auth::{Body, BodyDigest};
use crate::error::AuthErrorKind;

use super::headers::{
    HeaderSet, HEADER_BODY_DIGEST, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    HEADER_USER_ID,
};

/// Version tag prefixed to every signing message.
const SIGNING_VERSION: &str = "reqseal-v1";

/// A fully signed request's authentication fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Authenticated principal identifier.
    pub principal: String,

    /// Signing time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,

    /// Single-use token preventing replay.
    pub nonce: String,

    /// Digest of the request body.
    pub body_digest: BodyDigest,

    /// Raw signature bytes (hex on the wire).
    pub signature: Vec<u8>,
}

impl SignedRequest {
    /// Get the message to sign.
    ///
    /// Every field is length-prefixed so no choice of principal or nonce can
    /// shift bytes between fields:
    /// `reqseal-v1\n{len}:{principal}\n{len}:{timestamp}\n{len}:{nonce}\n{len}:{digest}\n`
    pub fn signing_message(&self) -> Vec<u8> {
        signing_message(
            &self.principal,
            self.timestamp_ms,
            &self.nonce,
            &self.body_digest,
        )
    }

    /// Render as the header set sent with the request.
    pub fn to_headers(&self) -> HeaderSet {
        HeaderSet::empty()
            .with(HEADER_USER_ID, self.principal.as_str())
            .with(HEADER_TIMESTAMP, self.timestamp_ms.to_string())
            .with(HEADER_NONCE, self.nonce.as_str())
            .with(HEADER_BODY_DIGEST, self.body_digest.to_hex())
            .with(HEADER_SIGNATURE, hex::encode(&self.signature))
    }

    /// Parse the authentication fields out of a header set.
    ///
    /// Presence of all five headers is checked before any value is parsed.
    pub fn from_headers(headers: &HeaderSet) -> Result<Self, AuthErrorKind> {
        let principal = required(headers, HEADER_USER_ID)?;
        let timestamp = required(headers, HEADER_TIMESTAMP)?;
        let nonce = required(headers, HEADER_NONCE)?;
        let digest = required(headers, HEADER_BODY_DIGEST)?;
        let signature = required(headers, HEADER_SIGNATURE)?;

        let timestamp_ms = timestamp
            .parse::<u64>()
            .map_err(|_| AuthErrorKind::MalformedField {
                header: HEADER_TIMESTAMP,
            })?;
        let body_digest =
            BodyDigest::from_hex(digest).ok_or(AuthErrorKind::MalformedField {
                header: HEADER_BODY_DIGEST,
            })?;
        let signature = hex::decode(signature).map_err(|_| AuthErrorKind::MalformedField {
            header: HEADER_SIGNATURE,
        })?;

        Ok(Self {
            principal: principal.to_string(),
            timestamp_ms,
            nonce: nonce.to_string(),
            body_digest,
            signature,
        })
    }
}

fn required<'a>(headers: &'a HeaderSet, name: &'static str) -> Result<&'a str, AuthErrorKind> {
    headers
        .get(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthErrorKind::MissingFields { header: name })
}

/// Canonical signing message for the given fields.
pub fn signing_message(
    principal: &str,
    timestamp_ms: u64,
    nonce: &str,
    body_digest: &BodyDigest,
) -> Vec<u8> {
    let timestamp = timestamp_ms.to_string();
    let digest = body_digest.to_hex();

    let mut message = Vec::with_capacity(
        SIGNING_VERSION.len() + principal.len() + timestamp.len() + nonce.len() + digest.len() + 32,
    );
    message.extend_from_slice(SIGNING_VERSION.as_bytes());
    message.push(b'\n');
    for field in [principal, timestamp.as_str(), nonce, digest.as_str()] {
        message.extend_from_slice(field.len().to_string().as_bytes());
        message.push(b':');
        message.extend_from_slice(field.as_bytes());
        message.push(b'\n');
    }
    message
}

/// A request as framed on the daemon socket.
///
/// The body travels as the exact text the digest was computed over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Authentication (and any other) headers.
    pub headers: HeaderSet,

    /// Raw request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Envelope {
    /// Build an envelope carrying the wire encoding of `body`.
    pub fn new(headers: HeaderSet, body: &Body) -> Self {
        let body = match body {
            Body::Absent => None,
            other => Some(String::from_utf8_lossy(&other.to_bytes()).into_owned()),
        };
        Self { headers, body }
    }

    /// The raw body bytes, empty when absent.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().map(str::as_bytes).unwrap_or_default()
    }
}
