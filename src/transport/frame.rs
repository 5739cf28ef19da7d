//! Length-prefixed frames: 4-byte big-endian length followed by the body
use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ingestion_guard::{FrameDisposition, IngestionGuard, SkipBuffer};
use crate::error::{MeridianError, Result};

/// Outcome of reading one frame
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Frame(Bytes),
    /// Oversized frame. When `drained` is true the stream is positioned at
    /// the next frame; otherwise the connection must be closed.
    Oversized { declared: usize, drained: bool },
    /// Peer closed the connection between frames
    Closed,
}

impl Inbound {
    pub fn into_result(self, guard: &IngestionGuard) -> Result<Bytes> {
        match self {
            Inbound::Frame(body) => Ok(body),
            Inbound::Oversized { declared, .. } => Err(MeridianError::PayloadTooLarge {
                declared,
                limit: guard.limits().max_frame_size,
            }),
            Inbound::Closed => Err(crate::transport_error!("connection closed")),
        }
    }
}

pub async fn read_frame<R>(
    reader: &mut R,
    guard: &IngestionGuard,
    skip: &mut SkipBuffer,
) -> Result<Inbound>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Inbound::Closed),
        Err(e) => return Err(e.into()),
    }
    let declared = u32::from_be_bytes(len_bytes) as usize;

    match guard.disposition(declared) {
        FrameDisposition::Accept => {
            let mut body = vec![0u8; declared];
            reader.read_exact(&mut body).await?;
            Ok(Inbound::Frame(Bytes::from(body)))
        }
        FrameDisposition::Drain => {
            skip.drain(reader, declared).await?;
            Ok(Inbound::Oversized {
                declared,
                drained: true,
            })
        }
        FrameDisposition::Refuse => Ok(Inbound::Oversized {
            declared,
            drained: false,
        }),
    }
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len())
        .map_err(|_| crate::transport_error!("frame of {} bytes cannot be encoded", body.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
