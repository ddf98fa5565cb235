//! Simple signing client for the reqseal daemon.
//!
//! Run with: cargo run --example sign_client -- [socket_path]
//!
//! The daemon's keys file must contain principal `demo` with the HMAC secret
//! below (hex `746573742d7365637265742d6b65792d666f722d646576656c6f706d656e742121`).
//!
//! Tests:
//! 1. Signed JSON body - accepted
//! 2. Same request replayed - rejected
//! 3. Body altered after signing - rejected
//! 4. Unsigned request - rejected
//! 5. Empty body - accepted

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use reqseal::auth::{Body, NonceLedger, RequestSigner, Session, SigningKey, SystemClock};
use reqseal::protocol::Envelope;

const DEFAULT_SOCKET: &str = "/run/reqseal/reqseal.sock";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== reqseal Signing Client ===\n");

    let socket_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SOCKET.to_string());

    let secret = b"test-secret-key-for-development!!";
    let session = Session::new("demo", SigningKey::hmac(secret)?);
    let ledger = Arc::new(NonceLedger::new(
        Duration::from_secs(900),
        Arc::new(SystemClock),
    ));
    let signer = RequestSigner::new(ledger);

    // Test 1: Signed request
    println!("Test 1: signed JSON body");
    let body = Body::Json(serde_json::json!({
        "prompt": "a lighthouse at dusk",
        "steps": 30
    }));
    let envelope = Envelope::new(signer.sign(Some(&session), &body)?, &body);
    let response = send_envelope(&socket_path, &envelope)?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response)?);

    // Test 2: Replay (should be rejected)
    println!("Test 2: replay of the same request");
    let response = send_envelope(&socket_path, &envelope)?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response)?);

    // Test 3: Tampered body (should be rejected)
    println!("Test 3: body altered after signing");
    let headers = signer.sign(Some(&session), &body)?;
    let tampered = Envelope::new(headers, &Body::Json(serde_json::json!({"steps": 300})));
    let response = send_envelope(&socket_path, &tampered)?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response)?);

    // Test 4: No session (should be rejected)
    println!("Test 4: unsigned request");
    let envelope = Envelope::new(signer.sign(None, &body)?, &body);
    let response = send_envelope(&socket_path, &envelope)?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response)?);

    // Test 5: Empty body
    println!("Test 5: empty body");
    let envelope = Envelope::new(signer.sign(Some(&session), &Body::Absent)?, &Body::Absent);
    let response = send_envelope(&socket_path, &envelope)?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response)?);

    println!("=== All tests completed ===");
    Ok(())
}

fn send_envelope(
    socket_path: &str,
    envelope: &Envelope,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let mut stream = UnixStream::connect(socket_path)?;

    let request_bytes = serde_json::to_vec(envelope)?;

    // Send length-prefixed message
    let len_bytes = (request_bytes.len() as u32).to_be_bytes();
    stream.write_all(&len_bytes)?;
    stream.write_all(&request_bytes)?;
    stream.flush()?;

    // Read response length
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut response_bytes = vec![0u8; len];
    stream.read_exact(&mut response_bytes)?;

    Ok(serde_json::from_slice(&response_bytes)?)
}
