//! Peer records held by the directory
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Liveness of a peer as seen by this node
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum PeerStatus {
    Bootstrapping,
    Live,
    Suspect,
    Dead,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerStatus::Bootstrapping => write!(f, "BOOTSTRAPPING"),
            PeerStatus::Live => write!(f, "LIVE"),
            PeerStatus::Suspect => write!(f, "SUSPECT"),
            PeerStatus::Dead => write!(f, "DEAD"),
        }
    }
}

/// Status a peer reports about itself; informational only
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ReportedStatus {
    #[default]
    Starting,
    Serving,
    ShuttingDown,
}

/// Data-center / rack placement
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Placement {
    pub data_center: String,
    pub rack: String,
}

impl Placement {
    pub fn new(data_center: impl Into<String>, rack: impl Into<String>) -> Self {
        Self {
            data_center: data_center.into(),
            rack: rack.into(),
        }
    }
}

/// Tablet counts reported by the peer's tablet manager
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TabletSummary {
    pub tablet_count: u32,
    pub leader_count: u32,
}

/// Everything a peer announces about itself when it registers
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PeerRegistration {
    pub node_id: NodeId,
    /// Private / listen endpoint
    pub primary: SocketAddr,
    /// Public endpoint advertised to clients
    pub broadcast: Option<SocketAddr>,
    pub placement: Placement,
    pub tokens: BTreeSet<String>,
    pub release_version: String,
}

/// One peer as stored in the directory. Records are immutable once
/// published; every mutation produces a new record.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub primary: SocketAddr,
    pub broadcast: Option<SocketAddr>,
    pub placement: Placement,
    pub tokens: BTreeSet<String>,
    pub release_version: String,
    pub status: PeerStatus,
    pub reported_status: ReportedStatus,
    pub tablet_summary: TabletSummary,
    pub sequence: u64,
    /// Monotonic time of the last applied heartbeat (or registration)
    pub last_heartbeat: Instant,
    /// Wall-clock time of the last mutation
    pub last_updated: DateTime<Utc>,
    /// Set when the record entered DEAD
    pub dead_since: Option<Instant>,
}

impl PeerRecord {
    /// A freshly registered peer: BOOTSTRAPPING with sequence 0
    pub fn bootstrapping(registration: PeerRegistration, now: Instant) -> Self {
        Self {
            node_id: registration.node_id,
            primary: registration.primary,
            broadcast: registration.broadcast,
            placement: registration.placement,
            tokens: registration.tokens,
            release_version: registration.release_version,
            status: PeerStatus::Bootstrapping,
            reported_status: ReportedStatus::Starting,
            tablet_summary: TabletSummary::default(),
            sequence: 0,
            last_heartbeat: now,
            last_updated: Utc::now(),
            dead_since: None,
        }
    }

    /// Copy of this record with endpoints and placement replaced;
    /// sequence and liveness are kept.
    pub fn reregistered(&self, registration: PeerRegistration) -> Self {
        Self {
            primary: registration.primary,
            broadcast: registration.broadcast,
            placement: registration.placement,
            tokens: registration.tokens,
            release_version: registration.release_version,
            last_updated: Utc::now(),
            ..self.clone()
        }
    }

    /// Whether a DEAD record has outlived the tombstone window at `now`
    pub fn is_tombstone_expired(&self, now: Instant, retention: std::time::Duration) -> bool {
        match (self.status, self.dead_since) {
            (PeerStatus::Dead, Some(since)) => now.saturating_duration_since(since) >= retention,
            _ => false,
        }
    }
}
