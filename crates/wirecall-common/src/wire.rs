//! Length-prefixed frame layer.
//!
//! Every message on a wirecall stream is one frame:
//! `[4-byte length prefix as u32 big-endian] + [data]`. The frame layer does
//! not know what the payload is; the handshake and the body codecs give the
//! bytes meaning.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, WirecallError};

/// Maximum frame size (100 MB), guarding against oversized allocations.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Reads one frame from the stream.
///
/// A clean end of stream before the length prefix yields
/// [`WirecallError::Eof`]; an end of stream mid-frame is a connection error,
/// since the peer hung up in the middle of a message.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WirecallError::Eof);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WirecallError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| WirecallError::Connection(format!("reading frame payload: {}", e)))?;

    Ok(buf)
}

/// Writes one frame. Flushing is left to the caller so that a header frame
/// and its body frame can go out as one unit.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WirecallError::FrameTooLarge(payload.len(), MAX_FRAME_SIZE));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}
