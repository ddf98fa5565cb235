//! Server-side verification of signed requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AuthErrorKind, ServiceError};
use crate::protocol::{HeaderSet, SignedRequest, HEADER_USER_ID};

use super::digest::{digest_bytes, BodyDigest};
use super::keys::KeyResolver;
use super::nonce::NonceLedger;

/// Default maximum clock difference between signing and verification.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// The authenticated facts about an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest {
    pub principal: String,
    pub nonce: String,
    pub timestamp_ms: u64,
    pub body_digest: BodyDigest,
}

/// Validates signed requests and consumes their nonces.
pub struct RequestVerifier {
    keys: Arc<dyn KeyResolver>,
    ledger: Arc<NonceLedger>,
    freshness_window: Duration,
}

impl RequestVerifier {
    /// Create a new verifier.
    ///
    /// The ledger TTL should be at least twice `freshness_window`, so a request
    /// replayed after its nonce is evicted is always stale.
    pub fn new(
        keys: Arc<dyn KeyResolver>,
        ledger: Arc<NonceLedger>,
        freshness_window: Duration,
    ) -> Self {
        Self {
            keys,
            ledger,
            freshness_window,
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn ledger(&self) -> &Arc<NonceLedger> {
        &self.ledger
    }

    /// Verify a request against the ledger clock.
    pub fn verify(
        &self,
        headers: &HeaderSet,
        raw_body: &[u8],
    ) -> Result<VerifiedRequest, ServiceError> {
        self.verify_at(headers, raw_body, self.ledger.clock().now_millis())
    }

    /// Verify a request at an explicit time.
    ///
    /// Checks, cheapest first and the shared-state mutation last:
    /// 1. All authentication headers are present and well formed
    /// 2. Timestamp is within the freshness window
    /// 3. Body digest matches the received bytes
    /// 4. Signature is valid for the principal's key
    /// 5. Nonce has not been used before
    ///
    /// The specific failure is logged here; callers should report every
    /// failure to the client identically.
    pub fn verify_at(
        &self,
        headers: &HeaderSet,
        raw_body: &[u8],
        now_ms: u64,
    ) -> Result<VerifiedRequest, ServiceError> {
        match self.check(headers, raw_body, now_ms) {
            Ok(verified) => {
                debug!(
                    principal = %verified.principal,
                    nonce = %verified.nonce,
                    "Request authenticated"
                );
                Ok(verified)
            }
            Err(kind) => {
                warn!(
                    principal = headers.get(HEADER_USER_ID).unwrap_or("<none>"),
                    reason = kind.reason_code(),
                    error = %kind,
                    "Request authentication rejected"
                );
                Err(ServiceError::auth(kind))
            }
        }
    }

    fn check(
        &self,
        headers: &HeaderSet,
        raw_body: &[u8],
        now_ms: u64,
    ) -> Result<VerifiedRequest, AuthErrorKind> {
        // 1. Structural checks
        let request = SignedRequest::from_headers(headers)?;

        // 2. Freshness, in both directions (clock skew protection)
        let skew_ms = now_ms.abs_diff(request.timestamp_ms);
        if u128::from(skew_ms) > self.freshness_window.as_millis() {
            return Err(AuthErrorKind::StaleTimestamp { skew_ms });
        }

        // 3. Body digest
        if digest_bytes(raw_body) != request.body_digest {
            return Err(AuthErrorKind::DigestMismatch);
        }

        // 4. Signature
        let Some(key) = self.keys.verification_key(&request.principal) else {
            debug!(principal = %request.principal, "No verification key for principal");
            return Err(AuthErrorKind::SignatureInvalid);
        };
        if !key.verify(&request.signing_message(), &request.signature) {
            return Err(AuthErrorKind::SignatureInvalid);
        }

        // 5. Nonce (replay prevention)
        if !self
            .ledger
            .reserve_at(&request.principal, &request.nonce, self.ledger.ttl(), now_ms)
        {
            return Err(AuthErrorKind::NonceReplayed);
        }

        Ok(VerifiedRequest {
            principal: request.principal,
            nonce: request.nonce,
            timestamp_ms: request.timestamp_ms,
            body_digest: request.body_digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::digest::{digest, Body};
    use crate::auth::keys::{KeyRing, SigningKey};
    use crate::auth::nonce::DEFAULT_NONCE_TTL;
    use crate::auth::signer::{RequestSigner, Session};
    use crate::protocol::{HEADER_NONCE, HEADER_SIGNATURE};
    use ring::rand::SystemRandom;
    use serde_json::json;
    use std::thread;

    const SECRET: &[u8] = b"test-secret-key-32-bytes-long!!";
    const WINDOW_MS: u64 = DEFAULT_FRESHNESS_WINDOW.as_millis() as u64;

    struct Fixture {
        session: Session,
        verifier: RequestVerifier,
    }

    fn fixture() -> Fixture {
        let session = Session::new("u1", SigningKey::hmac(SECRET).unwrap());
        let keys = KeyRing::new();
        keys.insert("u1", session.key().verification_key());

        let clock = Arc::new(ManualClock::new(1000));
        let ledger = Arc::new(NonceLedger::new(DEFAULT_NONCE_TTL, clock));
        let verifier = RequestVerifier::new(Arc::new(keys), ledger, DEFAULT_FRESHNESS_WINDOW);
        Fixture { session, verifier }
    }

    fn signed(session: &Session, ts: u64, nonce: &str, body: &Body) -> HeaderSet {
        RequestSigner::sign_parts(session, ts, nonce, digest(body)).to_headers()
    }

    fn kind(result: Result<VerifiedRequest, ServiceError>) -> AuthErrorKind {
        match result {
            Err(ServiceError::Auth { kind }) => kind,
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[test]
    fn test_end_to_end_scenario() {
        let f = fixture();
        let body = Body::Json(json!({"x": 1}));
        let raw = body.to_bytes();

        // Accepted once.
        let headers = signed(&f.session, 1000, "abc", &body);
        let verified = f.verifier.verify_at(&headers, &raw, 1000).unwrap();
        assert_eq!(verified.principal, "u1");
        assert_eq!(verified.nonce, "abc");

        // Replayed.
        assert_eq!(
            kind(f.verifier.verify_at(&headers, &raw, 1500)),
            AuthErrorKind::NonceReplayed
        );

        // Body tampered.
        let headers = signed(&f.session, 1000, "def", &body);
        let tampered = Body::Json(json!({"x": 2})).to_bytes();
        assert_eq!(
            kind(f.verifier.verify_at(&headers, &tampered, 1000)),
            AuthErrorKind::DigestMismatch
        );

        // Signature byte flipped.
        let mut request = RequestSigner::sign_parts(&f.session, 1500, "ghi", digest(&body));
        request.signature[0] ^= 0x01;
        assert_eq!(
            kind(f.verifier.verify_at(&request.to_headers(), &raw, 1500)),
            AuthErrorKind::SignatureInvalid
        );

        // Stale regardless of nonce state: the consumed "abc" headers and a
        // fresh nonce both fail on time first.
        let stale = AuthErrorKind::StaleTimestamp {
            skew_ms: WINDOW_MS + 1,
        };
        let original = signed(&f.session, 1000, "abc", &body);
        assert_eq!(
            kind(f.verifier.verify_at(&original, &raw, 1000 + WINDOW_MS + 1)),
            stale
        );
        let headers = signed(&f.session, 1000, "jkl", &body);
        assert_eq!(
            kind(f.verifier.verify_at(&headers, &raw, 1000 + WINDOW_MS + 1)),
            stale
        );
        assert!(!f.verifier.ledger().is_live("u1", "jkl"));
    }

    #[test]
    fn test_precision_tampering_is_digest_mismatch() {
        let f = fixture();
        let body = Body::from(r#"{"amount":12345678901234567890123}"#);
        let headers = signed(&f.session, 1000, "big", &body);

        let tampered = br#"{"amount":12345678901234567890124}"#;
        assert_eq!(
            kind(f.verifier.verify_at(&headers, tampered, 1000)),
            AuthErrorKind::DigestMismatch
        );

        let body = Body::from(r#"{"p":0.1}"#);
        let headers = signed(&f.session, 1000, "float", &body);
        assert_eq!(
            kind(f.verifier.verify_at(&headers, br#"{"p":0.10000000000000000001}"#, 1000)),
            AuthErrorKind::DigestMismatch
        );
        assert!(f.verifier.verify_at(&headers, br#"{ "p": 0.1 }"#, 1000).is_ok());
    }

    #[test]
    fn test_repeated_key_tampering_is_digest_mismatch() {
        let f = fixture();
        let body = Body::Json(json!({"role": "admin"}));
        let headers = signed(&f.session, 1000, "role", &body);

        assert_eq!(
            kind(f.verifier.verify_at(&headers, br#"{"role":"user","role":"admin"}"#, 1000)),
            AuthErrorKind::DigestMismatch
        );
        assert!(!f.verifier.ledger().is_live("u1", "role"));
    }

    #[test]
    fn test_rejection_does_not_consume_nonce() {
        let f = fixture();
        let body = Body::Json(json!({"x": 1}));
        let headers = signed(&f.session, 1000, "def", &body);

        let tampered = Body::Json(json!({"x": 2})).to_bytes();
        assert!(f.verifier.verify_at(&headers, &tampered, 1000).is_err());
        assert!(!f.verifier.ledger().is_live("u1", "def"));

        assert!(f.verifier.verify_at(&headers, &body.to_bytes(), 1000).is_ok());
        assert!(f.verifier.ledger().is_live("u1", "def"));
    }

    #[test]
    fn test_future_timestamp_is_stale() {
        let f = fixture();
        let headers = signed(&f.session, 1000 + WINDOW_MS + 1, "n", &Body::Absent);
        assert!(matches!(
            kind(f.verifier.verify_at(&headers, b"", 1000)),
            AuthErrorKind::StaleTimestamp { .. }
        ));
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let f = fixture();
        let headers = signed(&f.session, 1000, "edge", &Body::Absent);
        assert!(f
            .verifier
            .verify_at(&headers, b"", 1000 + WINDOW_MS)
            .is_ok());
    }

    #[test]
    fn test_missing_fields_checked_first() {
        let f = fixture();
        let mut headers = signed(&f.session, 1000, "n", &Body::Absent);
        headers.remove(HEADER_SIGNATURE);
        // Stale and tampered too, but missing fields wins.
        assert_eq!(
            kind(f.verifier.verify_at(&headers, b"junk", u64::MAX)),
            AuthErrorKind::MissingFields {
                header: HEADER_SIGNATURE
            }
        );

        assert!(matches!(
            kind(f.verifier.verify_at(&HeaderSet::empty(), b"", 1000)),
            AuthErrorKind::MissingFields { .. }
        ));
    }

    #[test]
    fn test_unknown_principal_is_signature_invalid() {
        let f = fixture();
        let stranger = Session::new("mallory", SigningKey::hmac(SECRET).unwrap());
        let headers = signed(&stranger, 1000, "n", &Body::Absent);
        assert_eq!(
            kind(f.verifier.verify_at(&headers, b"", 1000)),
            AuthErrorKind::SignatureInvalid
        );
    }

    #[test]
    fn test_principal_swap_is_signature_invalid() {
        let f = fixture();
        let other_key = SigningKey::hmac(b"another-secret-of-enough-length").unwrap();
        let other = Session::new("u2", other_key);
        let headers = signed(&other, 1000, "n", &Body::Absent).with(HEADER_USER_ID, "u1");
        assert_eq!(
            kind(f.verifier.verify_at(&headers, b"", 1000)),
            AuthErrorKind::SignatureInvalid
        );
    }

    #[test]
    fn test_empty_body_representations_verify() {
        let f = fixture();
        let headers = signed(&f.session, 1000, "e1", &Body::Absent);
        assert!(f.verifier.verify_at(&headers, b"{}", 1000).is_ok());

        let headers = signed(&f.session, 1000, "e2", &Body::Json(json!({})));
        assert!(f.verifier.verify_at(&headers, b"", 1000).is_ok());

        let headers = signed(&f.session, 1000, "e3", &Body::Text(String::new()));
        assert!(f.verifier.verify_at(&headers, b"null", 1000).is_ok());
    }

    #[test]
    fn test_ed25519_principal() {
        let (key, _) = SigningKey::generate_ed25519(&SystemRandom::new()).unwrap();
        let session = Session::new("svc", key);

        let f = fixture();
        let keys = KeyRing::new();
        keys.insert("svc", session.key().verification_key());
        let verifier = RequestVerifier::new(
            Arc::new(keys),
            Arc::clone(f.verifier.ledger()),
            DEFAULT_FRESHNESS_WINDOW,
        );

        let body = Body::from("prompt=a lighthouse");
        let headers = signed(&session, 1000, "ed", &body);
        assert!(verifier.verify_at(&headers, &body.to_bytes(), 1000).is_ok());
    }

    #[test]
    fn test_signer_output_verifies() {
        let f = fixture();
        let signer = RequestSigner::new(Arc::new(NonceLedger::new(
            DEFAULT_NONCE_TTL,
            Arc::clone(f.verifier.ledger().clock()),
        )));
        let body = Body::Json(json!({"prompt": "a cat", "steps": 20}));

        let headers = signer.sign(Some(&f.session), &body).unwrap();
        let verified = f.verifier.verify(&headers, &body.to_bytes()).unwrap();
        assert_eq!(verified.nonce, headers.get(HEADER_NONCE).unwrap());
    }

    #[test]
    fn test_concurrent_replays_accept_exactly_once() {
        let f = fixture();
        let body = Body::Json(json!({"x": 1}));
        let headers = signed(&f.session, 1000, "race", &body);
        let raw = body.to_bytes();

        let verifier = Arc::new(f.verifier);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let verifier = Arc::clone(&verifier);
                let headers = headers.clone();
                let raw = raw.clone();
                thread::spawn(move || verifier.verify_at(&headers, &raw, 1000).is_ok())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
    }
}
