//! Wire format for network ports.
//!
//! Frame format: `[length:4][body:N]`
//!
//! - **length**: size of `body` in bytes (big-endian u32)
//! - **body**: the payload as a `serde_json` document
//!
//! One frame carries the request and one frame carries the reply; the connection is
//! closed after that.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::value::{Payload, Value};

pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Non-finite float at '{path}' cannot be encoded")]
    NonFiniteFloat { path: String },

    #[error("Local port reference at '{path}' cannot cross a network transport")]
    LocalReference { path: String },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Serializes a payload into a frame body.
pub fn encode(payload: &Payload) -> CodecResult<Vec<u8>> {
    for (key, value) in payload {
        check_encodable(value, key)?;
    }
    Ok(serde_json::to_vec(payload)?)
}

pub fn decode(bytes: &[u8]) -> CodecResult<Payload> {
    Ok(serde_json::from_slice(bytes)?)
}

fn check_encodable(value: &Value, path: &str) -> CodecResult<()> {
    match value {
        Value::Float(f) if !f.is_finite() => Err(CodecError::NonFiniteFloat {
            path: path.to_string(),
        }),
        Value::Port(_) => Err(CodecError::LocalReference {
            path: path.to_string(),
        }),
        Value::List(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_encodable(item, &format!("{}[{}]", path, i))),
        Value::Map(entries) => entries
            .iter()
            .try_for_each(|(key, item)| check_encodable(item, &format!("{}.{}", path, key))),
        _ => Ok(()),
    }
}

/// Encodes `payload` and writes it as one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &Payload, max_size: usize) -> CodecResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = encode(payload)?;
    if body.len() > max_size || body.len() > u32::MAX as usize {
        return Err(CodecError::FrameTooLarge {
            size: body.len(),
            max: max_size,
        });
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    trace!("Wrote frame of {} bytes", body.len());
    Ok(())
}

/// Reads one length-prefixed frame and decodes it.
///
/// An oversized length prefix is rejected before any body bytes are allocated.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> CodecResult<Payload>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    let size = u32::from_be_bytes(prefix) as usize;
    if size > max_size {
        return Err(CodecError::FrameTooLarge {
            size,
            max: max_size,
        });
    }
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    trace!("Read frame of {} bytes", size);
    decode(&body)
}
