//! Wire format for message framing.
//!
//! Messages are length-prefixed: [4 bytes big-endian u32][payload]

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{ProtocolErrorKind, ServiceError};

/// Default maximum message size (1 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read a length-prefixed message from the reader.
///
/// Returns the raw bytes of the message payload.
/// Returns an error if the message is too large or if reading fails.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, ServiceError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ServiceError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            });
        }
        Err(e) => return Err(ServiceError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(ServiceError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge {
                size: len,
                max: max_size,
            },
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write a length-prefixed message to the writer.
pub async fn write_message<W>(writer: &mut W, data: &[u8]) -> Result<(), ServiceError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| ServiceError::Protocol {
        kind: ProtocolErrorKind::MessageTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        },
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed message with a timeout.
///
/// Returns a ConnectionTimeout error if the read takes longer than the specified duration.
pub async fn read_message_with_timeout<R>(
    reader: &mut R,
    max_size: usize,
    timeout_duration: Duration,
) -> Result<Vec<u8>, ServiceError>
where
    R: AsyncReadExt + Unpin,
{
    timeout(timeout_duration, read_message(reader, max_size))
        .await
        .map_err(|_| ServiceError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}

/// Write a length-prefixed message with a timeout.
pub async fn write_message_with_timeout<W>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> Result<(), ServiceError>
where
    W: AsyncWriteExt + Unpin,
{
    timeout(timeout_duration, write_message(writer, data))
        .await
        .map_err(|_| ServiceError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}

/// Framing limits for one connection, with JSON encode/decode on top.
#[derive(Debug, Clone, Copy)]
pub struct Framing {
    pub max_size: usize,
    pub timeout: Duration,
}

impl Framing {
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        Self { max_size, timeout }
    }

    /// Read one frame and decode it as JSON.
    ///
    /// A frame that is not valid JSON for `T` is an `InvalidMessageFormat`
    /// protocol error; the connection itself stays usable.
    pub async fn read_json<T, R>(&self, reader: &mut R) -> Result<T, ServiceError>
    where
        T: DeserializeOwned,
        R: AsyncReadExt + Unpin,
    {
        let msg = read_message_with_timeout(reader, self.max_size, self.timeout).await?;
        serde_json::from_slice(&msg).map_err(|e| ServiceError::Protocol {
            kind: ProtocolErrorKind::InvalidMessageFormat {
                message: format!("Invalid JSON: {}", e),
            },
        })
    }

    /// Encode `value` as JSON and write it as one frame.
    pub async fn write_json<T, W>(&self, writer: &mut W, value: &T) -> Result<(), ServiceError>
    where
        T: Serialize,
        W: AsyncWriteExt + Unpin,
    {
        let bytes = serde_json::to_vec(value)?;
        write_message_with_timeout(writer, &bytes, self.timeout).await
    }
}
