//! Wire framing: length-prefixed messages with a trailing integrity check.
//!
//! Every frame on a peer link is `[u32 length][u32 crc32][body; length bytes]`.
//! `length` bounds allocation before the body is read; `crc32` is checked
//! against the body once it lands. Either mismatch is a framing error and
//! is always link-fatal -- it never surfaces as an operation result.

use crate::error::{Error, Result};

/// Frames larger than this are rejected outright as malformed.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub struct FrameHeader {
    pub length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub fn new(body: &[u8]) -> Self {
        Self {
            length: body.len() as u32,
            checksum: crc32fast::hash(body),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let checksum = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self { length, checksum }
    }
}

/// Read one length-prefixed, checksummed frame and return its raw body.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    let len = header.length as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Framing(format!(
            "frame of {len} bytes exceeds max {MAX_FRAME_BYTES}"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let computed = crc32fast::hash(&body);
    if computed != header.checksum {
        return Err(Error::Framing(format!(
            "checksum mismatch: header says {:08x}, body hashes to {computed:08x}",
            header.checksum
        )));
    }

    Ok(body)
}

/// Frame and write a raw body.
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    if body.len() > MAX_FRAME_BYTES {
        return Err(Error::Framing(format!(
            "refusing to send frame of {} bytes, exceeds max {MAX_FRAME_BYTES}",
            body.len()
        )));
    }

    let header = FrameHeader::new(body);
    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let body = read_frame(&mut cursor).await.unwrap();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let header = FrameHeader {
            length: (MAX_FRAME_BYTES + 1) as u32,
            checksum: 0,
        };
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[tokio::test]
    async fn detects_checksum_mismatch() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"payload").await.unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }
}
