//! Authentication module.
//!
//! Handles body digests, key material, nonce tracking, request signing and
//! request verification.

mod canonical;
mod clock;
mod digest;
mod keys;
mod nonce;
mod signer;
mod verifier;

pub use canonical::canonical_json;
pub use clock::{Clock, ManualClock, SystemClock};
pub use digest::{digest, digest_bytes, Body, BodyDigest, DIGEST_LEN};
pub use keys::{KeyResolver, KeyRing, SigningKey, VerificationKey, MIN_HMAC_SECRET_LEN};
pub use nonce::{NonceLedger, DEFAULT_NONCE_TTL};
pub use signer::{generate_nonce, RequestSigner, Session, NONCE_BYTES};
pub use verifier::{RequestVerifier, VerifiedRequest, DEFAULT_FRESHNESS_WINDOW};
