//! RPC Ingestion Guard
//!
//! Bounds how much memory an inbound frame can make us allocate. Frames
//! over the hard limit are drained through a fixed-capacity scratch
//! buffer whose contents are never looked at.
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

pub const DEFAULT_SKIP_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_MAX_DRAIN: usize = 64 * 1024 * 1024;
/// Upper bound on what decoding one frame body may allocate. Frames larger
/// than this cannot be accepted at all.
pub const MAX_DECODE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestionLimits {
    /// Size of every skip buffer handed out
    pub skip_capacity: usize,
    /// Largest frame body that is read into memory
    pub max_frame_size: usize,
    /// Largest oversized frame we are willing to drain to keep the
    /// connection usable
    pub max_drain: usize,
}

impl Default for IngestionLimits {
    fn default() -> Self {
        Self {
            skip_capacity: DEFAULT_SKIP_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_drain: DEFAULT_MAX_DRAIN,
        }
    }
}

/// What to do with a frame of a given declared length
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDisposition {
    Accept,
    /// Too large: drain it and fail only this call
    Drain,
    /// Too large to drain: fail the call and drop the connection
    Refuse,
}

#[derive(Clone, Copy, Debug)]
pub struct IngestionGuard {
    limits: IngestionLimits,
}

impl IngestionGuard {
    /// Limits are fixed here for the life of the process
    pub fn new(limits: IngestionLimits) -> Result<Self> {
        if limits.skip_capacity == 0 {
            return Err(crate::config_error!("skip buffer capacity must be nonzero"));
        }
        if limits.max_frame_size > MAX_DECODE_BYTES {
            return Err(crate::config_error!(
                "max frame size ({}) exceeds the decode limit ({})",
                limits.max_frame_size,
                MAX_DECODE_BYTES
            ));
        }
        if limits.max_drain < limits.max_frame_size {
            return Err(crate::config_error!(
                "max drain ({}) must be at least the max frame size ({})",
                limits.max_drain,
                limits.max_frame_size
            ));
        }
        Ok(Self { limits })
    }

    pub fn limits(&self) -> &IngestionLimits {
        &self.limits
    }

    pub fn disposition(&self, declared: usize) -> FrameDisposition {
        if declared <= self.limits.max_frame_size {
            FrameDisposition::Accept
        } else if declared <= self.limits.max_drain {
            FrameDisposition::Drain
        } else {
            FrameDisposition::Refuse
        }
    }

    /// A scratch buffer of exactly the configured capacity. Each connection
    /// handler owns one and reuses it for every frame it drains.
    pub fn skip_buffer(&self) -> SkipBuffer {
        SkipBuffer {
            buf: vec![0u8; self.limits.skip_capacity].into_boxed_slice(),
        }
    }
}

/// Fixed-size discard area; never grows
#[derive(Debug)]
pub struct SkipBuffer {
    buf: Box<[u8]>,
}

impl SkipBuffer {
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Region of `min(n, capacity)` bytes to read discarded data into
    pub fn acquire_skip_target(&mut self, n: usize) -> &mut [u8] {
        let len = n.min(self.buf.len());
        &mut self.buf[..len]
    }

    /// Read and throw away exactly `declared` bytes
    pub async fn drain<R>(&mut self, reader: &mut R, declared: usize) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut remaining = declared;
        while remaining > 0 {
            let target = self.acquire_skip_target(remaining);
            let read = reader.read(target).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {} of {} bytes left to drain", remaining, declared),
                ));
            }
            remaining -= read;
        }
        Ok(declared)
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    /// Endless reader that records the largest read it was asked for
    struct MeasuringReader {
        largest_request: usize,
        reads: usize,
    }

    impl AsyncRead for MeasuringReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let wanted = buf.remaining();
            self.largest_request = self.largest_request.max(wanted);
            self.reads += 1;
            buf.put_slice(&vec![0xAB; wanted]);
            Poll::Ready(Ok(()))
        }
    }

    fn guard(capacity: usize) -> IngestionGuard {
        IngestionGuard::new(IngestionLimits {
            skip_capacity: capacity,
            max_frame_size: 1024,
            max_drain: usize::MAX,
        })
        .unwrap()
    }

    #[test]
    fn test_skip_target_is_capped() {
        let mut skip = guard(16).skip_buffer();
        assert_eq!(skip.acquire_skip_target(4).len(), 4);
        assert_eq!(skip.acquire_skip_target(1_000_000).len(), 16);
        assert_eq!(skip.capacity(), 16);
    }

    #[test]
    fn test_disposition() {
        let guard = IngestionGuard::new(IngestionLimits {
            skip_capacity: 8,
            max_frame_size: 100,
            max_drain: 1000,
        })
        .unwrap();
        assert_eq!(guard.disposition(100), FrameDisposition::Accept);
        assert_eq!(guard.disposition(101), FrameDisposition::Drain);
        assert_eq!(guard.disposition(1000), FrameDisposition::Drain);
        assert_eq!(guard.disposition(1001), FrameDisposition::Refuse);
    }

    #[test]
    fn test_invalid_limits() {
        assert!(IngestionGuard::new(IngestionLimits {
            skip_capacity: 0,
            ..IngestionLimits::default()
        })
        .is_err());
        assert!(IngestionGuard::new(IngestionLimits {
            max_frame_size: MAX_DECODE_BYTES + 1,
            max_drain: MAX_DECODE_BYTES * 2,
            ..IngestionLimits::default()
        })
        .is_err());
        assert!(IngestionGuard::new(IngestionLimits {
            skip_capacity: 8,
            max_frame_size: 100,
            max_drain: 10,
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_huge_drain_uses_only_guard_sized_reads() {
        let mut skip = guard(4096).skip_buffer();
        let mut reader = MeasuringReader {
            largest_request: 0,
            reads: 0,
        };
        let declared = 256 * 1024 * 1024;

        let drained = skip.drain(&mut reader, declared).await.unwrap();

        assert_eq!(drained, declared);
        assert_eq!(reader.largest_request, 4096);
        assert_eq!(reader.reads, declared / 4096);
        assert_eq!(skip.capacity(), 4096);
    }

    #[tokio::test]
    async fn test_drain_reports_early_eof() {
        let mut skip = guard(8).skip_buffer();
        let mut reader: &[u8] = &[1, 2, 3, 4, 5];
        let err = skip.drain(&mut reader, 20).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
