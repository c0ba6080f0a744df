//! Length-prefixed wire framing.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON-encoded
//! envelope. The frame ceiling guards against hostile or corrupted length
//! prefixes.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Read one frame body. `Ok(None)` signals a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("failed to read frame length"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        bail!("frame of {len} bytes exceeds the {max_frame_bytes} byte ceiling");
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("failed to read frame body")?;
    Ok(Some(body))
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).context("frame body exceeds u32 length")?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
