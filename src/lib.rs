//! reqseal
//!
//! Signed request authentication. Clients attach a principal, timestamp,
//! single-use nonce, body digest and signature to each request; the verifier
//! accepts a request at most once, within a bounded time window, and only if
//! the digest and signature match. The daemon exposes the verifier over a
//! Unix socket.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod socket;
