//! Synthesized ownership tokens
//!
//! Drivers use the token set to build a ring for routing. Peers that report
//! no tokens get one token each, spread evenly over the signed 64-bit ring
//! by their position among ring members ordered by primary address. The
//! position does not depend on who asks, so every caller sees the same ring.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::membership::directory::DirectorySnapshot;
use crate::membership::record::{PeerRecord, PeerStatus};
use crate::node::NodeId;

/// Token of the peer at `index` among `count` peers
pub fn synthesized_token(index: usize, count: usize) -> i64 {
    if count == 0 {
        return i64::MIN;
    }
    let step = (1i128 << 64) / count as i128;
    let token = i64::MIN as i128 + step * index as i128;
    token.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Ring positions of every member of one snapshot
#[derive(Debug)]
pub struct TokenRing {
    positions: HashMap<NodeId, usize>,
}

impl TokenRing {
    pub fn new(snapshot: &DirectorySnapshot, now: Instant, retention: Duration) -> Self {
        let mut members: Vec<(SocketAddr, NodeId)> = snapshot
            .records()
            .iter()
            .filter(|r| r.status != PeerStatus::Bootstrapping)
            .filter(|r| !r.is_tombstone_expired(now, retention))
            .map(|r| (r.primary, r.node_id))
            .collect();
        members.sort();
        let positions = members
            .into_iter()
            .enumerate()
            .map(|(index, (_, node_id))| (node_id, index))
            .collect();
        Self { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Reported tokens, or a single synthesized one when none were reported
    pub fn tokens(&self, record: &PeerRecord) -> Vec<String> {
        if !record.tokens.is_empty() {
            return record.tokens.iter().cloned().collect();
        }
        let count = self.positions.len().max(1);
        let index = self.positions.get(&record.node_id).copied().unwrap_or(0);
        vec![synthesized_token(index, count).to_string()]
    }
}
