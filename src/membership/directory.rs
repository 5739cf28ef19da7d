//! Peer Directory
//!
//! Concurrent map of peer identity to liveness record. Every mutation of a
//! single peer happens inside that peer's map entry guard and publishes a
//! new immutable `Arc<PeerRecord>`, so writers to one peer are linearized
//! while writers to other peers proceed in parallel. Readers copy the
//! `Arc`s out into a [`DirectorySnapshot`] and never touch the map again.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::messages::HeartbeatRequest;
use super::record::{PeerRecord, PeerRegistration, PeerStatus};
use crate::error::{MeridianError, Result};
use crate::node::NodeId;

/// Time thresholds driving the liveness state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MembershipConfig {
    pub heartbeat_interval: Duration,
    /// LIVE -> SUSPECT after this much silence
    pub heartbeat_deadline: Duration,
    /// SUSPECT -> DEAD after this much silence
    pub extended_deadline: Duration,
    /// DEAD records are purged this long after entering DEAD
    pub tombstone_retention: Duration,
}

pub const DEFAULT_TOMBSTONE_RETENTION: Duration = Duration::from_secs(60);

impl MembershipConfig {
    /// Deadlines derived from the heartbeat interval (3x and 10x)
    pub fn from_interval(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            heartbeat_deadline: heartbeat_interval * 3,
            extended_deadline: heartbeat_interval * 10,
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(crate::config_error!("heartbeat interval must be nonzero"));
        }
        if self.heartbeat_deadline >= self.extended_deadline {
            return Err(crate::config_error!(
                "heartbeat deadline ({:?}) must be shorter than the extended deadline ({:?})",
                self.heartbeat_deadline,
                self.extended_deadline
            ));
        }
        Ok(())
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self::from_interval(Duration::from_secs(1))
    }
}

/// Result of applying one heartbeat
#[derive(Clone, Debug)]
pub struct HeartbeatApplied {
    pub previous_status: Option<PeerStatus>,
    pub record: Arc<PeerRecord>,
    pub directory_version: u64,
}

/// Transitions performed by a single tick
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub suspected: Vec<NodeId>,
    pub dead: Vec<NodeId>,
    pub purged: Vec<NodeId>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.suspected.is_empty() && self.dead.is_empty() && self.purged.is_empty()
    }
}

/// Point-in-time copy of the directory
#[derive(Clone, Debug)]
pub struct DirectorySnapshot {
    /// Directory version observed when the snapshot started; every record
    /// is at least this new.
    pub version: u64,
    pub taken_at: Instant,
    records: Vec<Arc<PeerRecord>>,
}

impl DirectorySnapshot {
    pub fn records(&self) -> &[Arc<PeerRecord>] {
        &self.records
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Arc<PeerRecord>> {
        self.records
            .binary_search_by(|r| r.node_id.cmp(node_id))
            .ok()
            .map(|idx| &self.records[idx])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct PeerDirectory {
    peers: DashMap<NodeId, Arc<PeerRecord>>,
    version: AtomicU64,
    config: MembershipConfig,
}

impl PeerDirectory {
    pub fn new(config: MembershipConfig) -> Self {
        Self {
            peers: DashMap::new(),
            version: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    /// Incremented on every mutation
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Arc<PeerRecord>> {
        self.peers.get(node_id).map(|r| r.value().clone())
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Register a peer. New peers start BOOTSTRAPPING; a known peer keeps
    /// its sequence and status and only takes the new endpoints/placement.
    pub fn register(&self, registration: PeerRegistration, now: Instant) -> Arc<PeerRecord> {
        let node_id = registration.node_id;
        let record = match self.peers.entry(node_id) {
            Entry::Occupied(mut entry) => {
                let updated = Arc::new(entry.get().reregistered(registration));
                entry.insert(updated.clone());
                debug!("Re-registered peer {}", node_id);
                updated
            }
            Entry::Vacant(entry) => {
                let created = Arc::new(PeerRecord::bootstrapping(registration, now));
                entry.insert(created.clone());
                info!("Registered new peer {} at {}", node_id, created.primary);
                created
            }
        };
        self.bump_version();
        record
    }

    /// Apply a heartbeat. A sequence at or below the stored one is
    /// rejected with `StalePeerUpdate` and leaves the record untouched.
    pub fn apply_heartbeat(
        &self,
        heartbeat: &HeartbeatRequest,
        now: Instant,
    ) -> Result<HeartbeatApplied> {
        if let Some(registration) = &heartbeat.registration {
            if registration.node_id != heartbeat.node_id {
                return Err(crate::api_error!(
                    "registration for {} carried in heartbeat from {}",
                    registration.node_id,
                    heartbeat.node_id
                ));
            }
        }

        // The entry guard is held until the new record is published and the
        // version bumped, so updates to one peer never interleave.
        match self.peers.entry(heartbeat.node_id) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if heartbeat.sequence <= current.sequence {
                    return Err(MeridianError::StalePeerUpdate {
                        node_id: heartbeat.node_id,
                        current: current.sequence,
                        received: heartbeat.sequence,
                    });
                }
                let previous_status = current.status;
                let base = match &heartbeat.registration {
                    Some(registration) => current.reregistered(registration.clone()),
                    None => PeerRecord::clone(current),
                };
                let record = Arc::new(Self::with_heartbeat(base, heartbeat, now));
                entry.insert(record.clone());
                let directory_version = self.bump_version();
                if previous_status != PeerStatus::Live {
                    info!(
                        "Peer {} is LIVE (was {}) at sequence {}",
                        heartbeat.node_id, previous_status, heartbeat.sequence
                    );
                }
                Ok(HeartbeatApplied {
                    previous_status: Some(previous_status),
                    record,
                    directory_version,
                })
            }
            Entry::Vacant(entry) => {
                let registration = heartbeat
                    .registration
                    .clone()
                    .ok_or(MeridianError::UnknownPeer(heartbeat.node_id))?;
                if heartbeat.sequence == 0 {
                    return Err(MeridianError::StalePeerUpdate {
                        node_id: heartbeat.node_id,
                        current: 0,
                        received: 0,
                    });
                }
                let base = PeerRecord::bootstrapping(registration, now);
                let record = Arc::new(Self::with_heartbeat(base, heartbeat, now));
                entry.insert(record.clone());
                let directory_version = self.bump_version();
                info!(
                    "Peer {} registered via heartbeat and is LIVE at sequence {}",
                    heartbeat.node_id, heartbeat.sequence
                );
                Ok(HeartbeatApplied {
                    previous_status: None,
                    record,
                    directory_version,
                })
            }
        }
    }

    fn with_heartbeat(base: PeerRecord, heartbeat: &HeartbeatRequest, now: Instant) -> PeerRecord {
        PeerRecord {
            status: PeerStatus::Live,
            reported_status: heartbeat.reported_status,
            tablet_summary: heartbeat.tablet_summary,
            sequence: heartbeat.sequence,
            last_heartbeat: now,
            last_updated: Utc::now(),
            dead_since: None,
            ..base
        }
    }

    /// Next status for a record given the elapsed silence, if it changes
    fn timed_transition(&self, record: &PeerRecord, now: Instant) -> Option<PeerStatus> {
        let silent = now.saturating_duration_since(record.last_heartbeat);
        let (deadline, extended) = (self.config.heartbeat_deadline, self.config.extended_deadline);
        match record.status {
            PeerStatus::Live if silent >= extended => Some(PeerStatus::Dead),
            PeerStatus::Live if silent >= deadline => Some(PeerStatus::Suspect),
            PeerStatus::Suspect if silent >= extended => Some(PeerStatus::Dead),
            _ => None,
        }
    }

    /// Run the elapsed-time half of the state machine and purge expired
    /// tombstones.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let mut expired = Vec::new();

        for mut entry in self.peers.iter_mut() {
            let record = entry.value();
            if record.is_tombstone_expired(now, self.config.tombstone_retention) {
                expired.push(record.node_id);
                continue;
            }
            let Some(next) = self.timed_transition(record, now) else {
                continue;
            };
            let node_id = record.node_id;
            match next {
                PeerStatus::Suspect => {
                    warn!("Peer {} missed its heartbeat deadline, now SUSPECT", node_id);
                    report.suspected.push(node_id);
                }
                PeerStatus::Dead => {
                    warn!("Peer {} missed its extended deadline, now DEAD", node_id);
                    if record.status == PeerStatus::Live {
                        report.suspected.push(node_id);
                    }
                    report.dead.push(node_id);
                }
                _ => {}
            }
            let updated = PeerRecord {
                status: next,
                dead_since: (next == PeerStatus::Dead).then_some(now),
                last_updated: Utc::now(),
                ..PeerRecord::clone(record)
            };
            *entry.value_mut() = Arc::new(updated);
            self.bump_version();
        }

        for node_id in expired {
            // Re-checked under the entry lock: a heartbeat may have revived it.
            let removed = self.peers.remove_if(&node_id, |_, record| {
                record.is_tombstone_expired(now, self.config.tombstone_retention)
            });
            if removed.is_some() {
                info!("Purged tombstoned peer {}", node_id);
                report.purged.push(node_id);
                self.bump_version();
            }
        }

        report
    }

    /// Copy of the whole directory; later mutations do not affect it.
    pub fn snapshot(&self) -> DirectorySnapshot {
        let version = self.version();
        let mut records: Vec<Arc<PeerRecord>> =
            self.peers.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        DirectorySnapshot {
            version,
            taken_at: Instant::now(),
            records,
        }
    }
}
