//! Unix socket server module.
//!
//! Accepts framed envelopes, authenticates them and answers with a sanitized
//! response.

mod connection;
mod listener;

pub use connection::handle_connection;
pub use listener::{ConnectionMetrics, SocketListener};
