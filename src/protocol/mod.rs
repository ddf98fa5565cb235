//! Wire protocol module.
//!
//! Defines the authentication header set, request/response types and message
//! framing for socket communication.
//!
//! ## Wire Format
//!
//! Messages are length-prefixed JSON:
//! ```text
//! [4 bytes: length (big-endian u32)][JSON payload]
//! ```

mod headers;
mod request;
mod response;
mod wire;

pub use headers::{
    HeaderSet, AUTH_HEADERS, HEADER_BODY_DIGEST, HEADER_NONCE, HEADER_SIGNATURE,
    HEADER_TIMESTAMP, HEADER_USER_ID,
};
pub use request::{signing_message, Envelope, SignedRequest};
pub use response::{
    ErrorResponse, Response, CODE_AUTH_ERROR, CODE_INTERNAL_ERROR, CODE_PROTOCOL_ERROR,
};
pub use wire::{
    read_message, read_message_with_timeout, write_message, write_message_with_timeout, Framing,
    DEFAULT_MAX_MESSAGE_SIZE,
};
