//! C1: the wire codec.
//!
//! Framing (length + crc32) is independent of the message set so that a
//! framing error can be raised and the link torn down before any attempt
//! is made to interpret the bytes as a particular message.

mod frame;
mod message;

pub use frame::{read_frame, write_frame, FrameHeader, MAX_FRAME_BYTES};
pub use message::{
    Body, Hello, LeaderAccept, LeaderPromise, LeaderReject, LeaderSubmit, Message, Ping,
    ProxyAccept, ProxyReject, ProxyRequest, ProxySubmit, Reject, Submit,
};

use crate::error::Result;

/// Read one message from a framed stream.
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let body = read_frame(reader).await?;
    Message::decode(&body)
}

/// Encode and write one message to a framed stream.
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    let body = message.encode()?;
    write_frame(writer, &body).await
}
