//! Message serialization and deserialization using postcard
//!
//! Messages are serialized using postcard (compact binary format) and framed
//! with a length prefix so they can be carried over a byte stream such as the
//! bridge's stdin/stdout.
//!
//! # Frame Format
//!
//! ```text
//! [Length: u32 (big-endian)][Message bytes (postcard serialized)]
//! ```
//!
//! Maximum frame size is 1 MiB. Real messages are a few dozen bytes; the cap
//! only guards against reading garbage as a length.

use crate::{CURRENT_VERSION, Message, ProtocolVersion, error::ProtocolError, error::Result};
use std::io::{Read, Write};

#[cfg(feature = "async")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum allowed frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the big-endian length prefix
const PREFIX_LEN: usize = 4;

/// Encode a message to bytes using postcard
///
/// # Example
/// ```
/// use protocol::{Message, MessagePayload, encode_message};
///
/// let bytes = encode_message(&Message::new(MessagePayload::Ping)).unwrap();
/// assert!(!bytes.is_empty());
/// ```
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    postcard::to_allocvec(message).map_err(ProtocolError::from)
}

/// Decode a message from bytes using postcard
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    postcard::from_bytes(bytes).map_err(ProtocolError::from)
}

/// Reject messages whose major version differs from [`CURRENT_VERSION`]
pub fn validate_version(message_version: &ProtocolVersion) -> Result<()> {
    if CURRENT_VERSION.accepts(message_version) {
        Ok(())
    } else {
        Err(ProtocolError::IncompatibleVersion {
            found: *message_version,
            expected: CURRENT_VERSION,
        })
    }
}

/// Encode a message with length prefix for framing
///
/// # Example
/// ```
/// use protocol::{Message, MessagePayload, encode_framed, decode_framed};
///
/// let msg = Message::new(MessagePayload::ConnectAllRequest);
/// let framed = encode_framed(&msg).unwrap();
/// assert_eq!(decode_framed(&framed).unwrap(), msg);
/// ```
pub fn encode_framed(message: &Message) -> Result<Vec<u8>> {
    let body = encode_message(message)?;
    let prefix = length_prefix(body.len())?;

    let mut frame = Vec::with_capacity(PREFIX_LEN + body.len());
    frame.extend_from_slice(&prefix);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame from the start of `frame`; trailing bytes are ignored
pub fn decode_framed(frame: &[u8]) -> Result<Message> {
    let (prefix, rest) = frame
        .split_first_chunk::<PREFIX_LEN>()
        .ok_or(ProtocolError::Truncated {
            needed: PREFIX_LEN,
            available: frame.len(),
        })?;

    let length = body_length(*prefix)?;
    let body = rest.get(..length).ok_or(ProtocolError::Truncated {
        needed: PREFIX_LEN + length,
        available: frame.len(),
    })?;

    decode_message(body)
}

/// Write a framed message to a writer
pub fn write_framed<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&encode_framed(message)?)?;
    Ok(())
}

/// Read a framed message from a reader
///
/// # Example
/// ```
/// use protocol::{Message, MessagePayload, write_framed, read_framed};
/// use std::io::Cursor;
///
/// let mut buffer = Vec::new();
/// write_framed(&mut buffer, &Message::new(MessagePayload::Pong)).unwrap();
///
/// let decoded = read_framed(&mut Cursor::new(buffer)).unwrap();
/// assert_eq!(decoded.payload, MessagePayload::Pong);
/// ```
pub fn read_framed<R: Read>(reader: &mut R) -> Result<Message> {
    let mut prefix = [0u8; PREFIX_LEN];
    reader.read_exact(&mut prefix)?;

    let mut body = vec![0u8; body_length(prefix)?];
    reader.read_exact(&mut body)?;
    decode_message(&body)
}

/// Async: Write a framed message to an async writer and flush it
#[cfg(feature = "async")]
pub async fn write_framed_async<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(&encode_framed(message)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Async: Read one framed message from an async reader
///
/// Not cancel safe: a partially read frame is lost if the future is dropped,
/// so drive it from a dedicated task rather than a `select!` branch.
#[cfg(feature = "async")]
pub async fn read_framed_async<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    reader.read_exact(&mut prefix).await?;

    let mut body = vec![0u8; body_length(prefix)?];
    reader.read_exact(&mut body).await?;
    decode_message(&body)
}

fn length_prefix(length: usize) -> Result<[u8; PREFIX_LEN]> {
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok((length as u32).to_be_bytes())
}

fn body_length(prefix: [u8; PREFIX_LEN]) -> Result<usize> {
    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(length)
}
