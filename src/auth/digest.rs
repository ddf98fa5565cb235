//! Deterministic request body digests.
//!
//! Both sides of the protocol digest the exact bytes that travel on the wire,
//! after one normalization step:
//!
//! 1. Empty or whitespace-only bytes map to the EMPTY sentinel.
//! 2. Bytes that parse as JSON with no repeated object key are re-encoded
//!    canonically (see [`canonical_json`]). JSON `null`, `""` and `{}` map to
//!    the EMPTY sentinel; anything else is hashed in canonical form.
//! 3. All other bytes, including JSON that repeats a key, are hashed as-is.
//!
//! Each branch hashes under its own domain tag, so no body in one branch can
//! share a preimage with a body in another or with the sentinel.

use std::fmt;

use ring::digest::{digest as sha256, Context, SHA256};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::canonical::{canonical_json, parse_unique, to_value_with_text_keys};

/// Length of a body digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Domain tag hashed to produce the EMPTY sentinel.
const EMPTY_BODY_TAG: &[u8] = b"reqseal/empty-body/v1";
/// Prefix for bodies hashed in canonical JSON form.
const JSON_DOMAIN: &[u8] = b"reqseal/json\0";
/// Prefix for bodies hashed as raw bytes.
const RAW_DOMAIN: &[u8] = b"reqseal/raw\0";

/// A SHA-256 fingerprint of a request body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyDigest([u8; DIGEST_LEN]);

impl BodyDigest {
    /// The sentinel digest shared by every "no body" representation.
    pub fn empty() -> Self {
        Self::from_hash(sha256(&SHA256, EMPTY_BODY_TAG))
    }

    fn of(domain: &[u8], bytes: &[u8]) -> Self {
        let mut ctx = Context::new(&SHA256);
        ctx.update(domain);
        ctx.update(bytes);
        Self::from_hash(ctx.finish())
    }

    fn from_hash(hash: ring::digest::Digest) -> Self {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(hash.as_ref());
        Self(out)
    }

    pub fn is_empty_sentinel(&self) -> bool {
        *self == Self::empty()
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex, as sent in the `x-body-digest` header.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex digest. Returns `None` unless it decodes to exactly 32 bytes.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        let arr: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for BodyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BodyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BodyDigest({})", self.to_hex())
    }
}

/// A request body as the client sees it before transmission.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No body at all.
    #[default]
    Absent,
    /// A textual body sent verbatim.
    Text(String),
    /// A structured body sent as canonical JSON.
    Json(Value),
}

impl Body {
    /// Convert any serializable value into a body.
    ///
    /// Maps with keys serde_json cannot represent (tuples, structs) are
    /// converted with those keys written as canonical JSON text, so equal
    /// values always give equal bodies. Only a value whose own `Serialize`
    /// impl fails falls back to its `Debug` rendering sent as text.
    pub fn from_serialize<T>(value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        let err = match serde_json::to_value(value) {
            Ok(json) => return Body::Json(json),
            Err(e) => e,
        };
        match to_value_with_text_keys(value) {
            Ok(json) => {
                debug!(error = %err, "Body has non-string map keys, encoding them as JSON text");
                Body::Json(json)
            }
            Err(e) => {
                warn!(error = %e, "Body is not serializable, digesting its debug encoding");
                Body::Text(format!("{:?}", value))
            }
        }
    }

    /// The exact bytes a client must transmit for this body.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Body::Absent => Vec::new(),
            Body::Text(text) => text.as_bytes().to_vec(),
            Body::Json(value) => canonical_json(value).into_bytes(),
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl<T: Into<Body>> From<Option<T>> for Body {
    fn from(body: Option<T>) -> Self {
        body.map_or(Body::Absent, Into::into)
    }
}

/// Digest a client-side body.
pub fn digest(body: &Body) -> BodyDigest {
    digest_bytes(&body.to_bytes())
}

/// Digest raw body bytes exactly as received.
pub fn digest_bytes(raw: &[u8]) -> BodyDigest {
    if raw.trim_ascii().is_empty() {
        return BodyDigest::empty();
    }

    match parse_unique(raw) {
        Some(value) if is_empty_value(&value) => BodyDigest::empty(),
        Some(value) => BodyDigest::of(JSON_DOMAIN, canonical_json(&value).as_bytes()),
        None => BodyDigest::of(RAW_DOMAIN, raw),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
