//! Client-side request signing.

use std::sync::Arc;

use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, warn};

use crate::error::{AuthErrorKind, ServiceError};
use crate::protocol::{HeaderSet, SignedRequest};

use super::clock::Clock;
use super::digest::{digest, Body, BodyDigest};
use super::keys::SigningKey;
use super::nonce::NonceLedger;

/// Nonce entropy in bytes (128 bits).
pub const NONCE_BYTES: usize = 16;

/// Attempts at drawing a nonce that is not already live locally.
const NONCE_ATTEMPTS: usize = 3;

/// An authenticated principal and the key material issued at login.
#[derive(Debug)]
pub struct Session {
    principal: String,
    key: SigningKey,
}

impl Session {
    pub fn new(principal: impl Into<String>, key: SigningKey) -> Self {
        Self {
            principal: principal.into(),
            key,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }
}

/// Produces authentication headers for outgoing requests.
///
/// Every nonce the signer hands out is also reserved in a local ledger with
/// the server TTL, so accidental local reuse is caught before it reaches the
/// server.
pub struct RequestSigner {
    ledger: Arc<NonceLedger>,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
}

impl RequestSigner {
    /// Create a signer that records nonces in `ledger` and stamps requests
    /// with the ledger's clock.
    pub fn new(ledger: Arc<NonceLedger>) -> Self {
        let clock = Arc::clone(ledger.clock());
        Self {
            ledger,
            clock,
            rng: SystemRandom::new(),
        }
    }

    /// Sign a request body on behalf of `session`.
    ///
    /// Without a session the result is [`HeaderSet::empty`]; the request will
    /// go out unauthenticated and be rejected downstream.
    pub fn sign(&self, session: Option<&Session>, body: &Body) -> Result<HeaderSet, ServiceError> {
        let Some(session) = session else {
            debug!("No authenticated principal, sending request unsigned");
            return Ok(HeaderSet::empty());
        };

        let timestamp_ms = self.clock.now_millis();
        let nonce = self.fresh_nonce(session.principal(), timestamp_ms)?;
        let body_digest = digest(body);

        let request = Self::sign_parts(session, timestamp_ms, nonce, body_digest);
        debug!(
            principal = %request.principal,
            nonce = %request.nonce,
            timestamp_ms,
            "Request signed"
        );
        Ok(request.to_headers())
    }

    /// Assemble and sign a request from explicit parts.
    ///
    /// Does not consult or update the local ledger.
    pub fn sign_parts(
        session: &Session,
        timestamp_ms: u64,
        nonce: impl Into<String>,
        body_digest: BodyDigest,
    ) -> SignedRequest {
        let mut request = SignedRequest {
            principal: session.principal().to_string(),
            timestamp_ms,
            nonce: nonce.into(),
            body_digest,
            signature: Vec::new(),
        };
        request.signature = session.key().sign(&request.signing_message());
        request
    }

    fn fresh_nonce(&self, principal: &str, now_ms: u64) -> Result<String, ServiceError> {
        for _ in 0..NONCE_ATTEMPTS {
            let nonce = generate_nonce(&self.rng)?;
            if self
                .ledger
                .reserve_at(principal, &nonce, self.ledger.ttl(), now_ms)
            {
                return Ok(nonce);
            }
            warn!(principal, "Generated nonce already live locally, drawing again");
        }
        Err(ServiceError::auth(AuthErrorKind::RandomSource))
    }
}

/// Draw a 128-bit nonce from the OS CSPRNG, hex encoded.
pub fn generate_nonce(rng: &dyn SecureRandom) -> Result<String, ServiceError> {
    let mut bytes = [0u8; NONCE_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| ServiceError::auth(AuthErrorKind::RandomSource))?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::nonce::DEFAULT_NONCE_TTL;
    use crate::protocol::{AUTH_HEADERS, HEADER_NONCE};
    use serde_json::json;
    use std::collections::HashSet;

    const SECRET: &[u8] = b"test-secret-key-32-bytes-long!!";

    fn signer_at(now: u64) -> (Arc<NonceLedger>, RequestSigner) {
        let clock = Arc::new(ManualClock::new(now));
        let ledger = Arc::new(NonceLedger::new(DEFAULT_NONCE_TTL, clock));
        let signer = RequestSigner::new(Arc::clone(&ledger));
        (ledger, signer)
    }

    fn session() -> Session {
        Session::new("u1", SigningKey::hmac(SECRET).unwrap())
    }

    #[test]
    fn test_sign_produces_all_headers() {
        let (_ledger, signer) = signer_at(1000);
        let headers = signer
            .sign(Some(&session()), &Body::Json(json!({"x": 1})))
            .unwrap();

        for name in AUTH_HEADERS {
            assert!(headers.get(name).is_some(), "missing {name}");
        }

        let request = SignedRequest::from_headers(&headers).unwrap();
        assert_eq!(request.principal, "u1");
        assert_eq!(request.timestamp_ms, 1000);
        assert_eq!(request.nonce.len(), NONCE_BYTES * 2);
        assert_eq!(request.body_digest, digest(&Body::Json(json!({"x": 1}))));
        assert!(session()
            .key()
            .verification_key()
            .verify(&request.signing_message(), &request.signature));
    }

    #[test]
    fn test_no_session_yields_empty_headers() {
        let (ledger, signer) = signer_at(1000);
        let headers = signer.sign(None, &Body::Json(json!({"x": 1}))).unwrap();
        assert!(headers.is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_sign_reserves_nonce_locally() {
        let (ledger, signer) = signer_at(1000);
        let headers = signer.sign(Some(&session()), &Body::Absent).unwrap();
        let nonce = headers.get(HEADER_NONCE).unwrap();
        assert!(ledger.is_live("u1", nonce));
    }

    #[test]
    fn test_nonces_are_unique() {
        let (_ledger, signer) = signer_at(1000);
        let session = session();
        let nonces: HashSet<String> = (0..200)
            .map(|_| {
                let headers = signer.sign(Some(&session), &Body::Absent).unwrap();
                headers.get(HEADER_NONCE).unwrap().to_string()
            })
            .collect();
        assert_eq!(nonces.len(), 200);
    }

    #[test]
    fn test_sign_parts_is_deterministic_for_hmac() {
        let s = session();
        let a = RequestSigner::sign_parts(&s, 1000, "abc", BodyDigest::empty());
        let b = RequestSigner::sign_parts(&s, 1000, "abc", BodyDigest::empty());
        assert_eq!(a, b);

        let c = RequestSigner::sign_parts(&s, 1001, "abc", BodyDigest::empty());
        assert_ne!(a.signature, c.signature);
    }
}
