//! Receiver statistics
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub connections_accepted: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_oversized: AtomicU64,
    pub bytes_drained: AtomicU64,
    pub connections_dropped: AtomicU64,
    pub receive_errors: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FrozenReceiverStats {
    pub connections_accepted: u64,
    pub frames_received: u64,
    pub frames_oversized: u64,
    pub bytes_drained: u64,
    pub connections_dropped: u64,
    pub receive_errors: u64,
}

impl ReceiverStats {
    pub fn freeze(&self) -> FrozenReceiverStats {
        FrozenReceiverStats {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_oversized: self.frames_oversized.load(Ordering::Relaxed),
            bytes_drained: self.bytes_drained.load(Ordering::Relaxed),
            connections_dropped: self.connections_dropped.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}
