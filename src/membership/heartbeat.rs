//! Heartbeat Receiver
//!
//! Validates incoming membership RPCs and applies them to the directory.
//! Application is synchronous and does no retries; a stale heartbeat is
//! logged and answered, never treated as fatal.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::directory::PeerDirectory;
use super::messages::{ConfigDelta, HeartbeatRequest, HeartbeatResponse, RpcRequest, RpcResponse};
use crate::error::{MeridianError, Result};
use crate::transport::RequestHandler;

/// Versioned runtime flags pushed to members through heartbeat responses
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeFlags {
    pub version: u64,
    pub flags: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct HeartbeatStats {
    pub applied: AtomicU64,
    pub stale: AtomicU64,
    pub unknown: AtomicU64,
    pub registrations: AtomicU64,
    pub rejected: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FrozenHeartbeatStats {
    pub applied: u64,
    pub stale: u64,
    pub unknown: u64,
    pub registrations: u64,
    pub rejected: u64,
}

impl HeartbeatStats {
    pub fn freeze(&self) -> FrozenHeartbeatStats {
        FrozenHeartbeatStats {
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HeartbeatReceiver {
    directory: Arc<PeerDirectory>,
    flags: Arc<RwLock<Arc<RuntimeFlags>>>,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatReceiver {
    pub fn new(directory: Arc<PeerDirectory>) -> Self {
        Self {
            directory,
            flags: Arc::new(RwLock::new(Arc::new(RuntimeFlags::default()))),
            stats: Arc::new(HeartbeatStats::default()),
        }
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn stats(&self) -> FrozenHeartbeatStats {
        self.stats.freeze()
    }

    fn current_flags(&self) -> Arc<RuntimeFlags> {
        // flags are replaced wholesale, a poisoned lock still holds a whole value
        self.flags
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Set a runtime flag; bumps the config version so members pick it up
    pub fn set_flag(&self, name: impl Into<String>, value: impl Into<String>) -> u64 {
        let mut guard = self
            .flags
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = RuntimeFlags::clone(&guard);
        next.flags.insert(name.into(), value.into());
        next.version += 1;
        let version = next.version;
        *guard = Arc::new(next);
        version
    }

    fn config_deltas(&self, known_version: u64) -> (u64, Vec<ConfigDelta>) {
        let flags = self.current_flags();
        if known_version >= flags.version {
            return (flags.version, Vec::new());
        }
        let deltas = flags
            .flags
            .iter()
            .map(|(name, value)| ConfigDelta {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        (flags.version, deltas)
    }

    /// Apply one heartbeat. Stale deliveries come back as
    /// `StalePeerUpdate`, unknown members as `UnknownPeer`.
    pub fn receive_heartbeat(
        &self,
        heartbeat: &HeartbeatRequest,
        now: Instant,
    ) -> Result<HeartbeatResponse> {
        let applied = self.directory.apply_heartbeat(heartbeat, now)?;
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Applied heartbeat from {} sequence {} (directory version {})",
            heartbeat.node_id, heartbeat.sequence, applied.directory_version
        );
        let (config_version, config_deltas) = self.config_deltas(heartbeat.config_version);
        Ok(HeartbeatResponse {
            directory_version: applied.directory_version,
            config_version,
            config_deltas,
            needs_reregister: false,
            stale: false,
        })
    }

    /// Handle a decoded RPC, turning per-peer failures into responses
    pub fn handle(&self, request: RpcRequest, now: Instant) -> RpcResponse {
        match request {
            RpcRequest::Register(registration) => {
                self.directory.register(registration, now);
                self.stats.registrations.fetch_add(1, Ordering::Relaxed);
                RpcResponse::Registered {
                    directory_version: self.directory.version(),
                }
            }
            RpcRequest::Heartbeat(heartbeat) => match self.receive_heartbeat(&heartbeat, now) {
                Ok(response) => RpcResponse::Heartbeat(response),
                Err(err @ MeridianError::StalePeerUpdate { .. }) => {
                    self.stats.stale.fetch_add(1, Ordering::Relaxed);
                    warn!("Ignoring heartbeat: {}", err);
                    let (config_version, config_deltas) =
                        self.config_deltas(heartbeat.config_version);
                    RpcResponse::Heartbeat(HeartbeatResponse {
                        directory_version: self.directory.version(),
                        config_version,
                        config_deltas,
                        needs_reregister: false,
                        stale: true,
                    })
                }
                Err(MeridianError::UnknownPeer(node_id)) => {
                    self.stats.unknown.fetch_add(1, Ordering::Relaxed);
                    debug!("Heartbeat from unregistered peer {}, asking to re-register", node_id);
                    RpcResponse::Heartbeat(HeartbeatResponse {
                        directory_version: self.directory.version(),
                        needs_reregister: true,
                        ..HeartbeatResponse::default()
                    })
                }
                Err(err) => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!("Rejected heartbeat from {}: {}", heartbeat.node_id, err);
                    RpcResponse::error(&err)
                }
            },
        }
    }
}

#[async_trait]
impl RequestHandler for HeartbeatReceiver {
    async fn handle_request(&self, request: &[u8]) -> Result<Vec<u8>> {
        let response = match RpcRequest::deserialize(request) {
            Ok(request) => self.handle(request, Instant::now()),
            Err(err) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Undecodable membership RPC: {}", err);
                RpcResponse::error(&err)
            }
        };
        response.serialize()
    }

    fn reject(&self, error: &MeridianError) -> Result<Vec<u8>> {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        RpcResponse::error(error).serialize()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::membership::directory::MembershipConfig;
    use crate::membership::record::{
        PeerRegistration, PeerStatus, Placement, ReportedStatus, TabletSummary,
    };
    use crate::node::NodeId;

    fn receiver() -> HeartbeatReceiver {
        HeartbeatReceiver::new(Arc::new(PeerDirectory::new(MembershipConfig::default())))
    }

    fn registration(id: u128) -> PeerRegistration {
        PeerRegistration {
            node_id: NodeId::from(id),
            primary: "10.0.0.1:9100".parse().unwrap(),
            broadcast: None,
            placement: Placement::new("dc1", "rack1"),
            tokens: BTreeSet::new(),
            release_version: "2.20.0".to_string(),
        }
    }

    fn heartbeat(id: u128, sequence: u64) -> HeartbeatRequest {
        HeartbeatRequest {
            node_id: NodeId::from(id),
            sequence,
            reported_status: ReportedStatus::Serving,
            tablet_summary: TabletSummary::default(),
            registration: None,
            config_version: 0,
        }
    }

    #[test]
    fn test_late_heartbeat_is_reported_stale() {
        let receiver = receiver();
        let now = Instant::now();
        receiver.handle(RpcRequest::Register(registration(1)), now);
        receiver.handle(RpcRequest::Heartbeat(heartbeat(1, 5)), now);

        let result = receiver.receive_heartbeat(&heartbeat(1, 3), now);
        assert!(matches!(
            result,
            Err(MeridianError::StalePeerUpdate {
                current: 5,
                received: 3,
                ..
            })
        ));

        match receiver.handle(RpcRequest::Heartbeat(heartbeat(1, 3)), now) {
            RpcResponse::Heartbeat(response) => assert!(response.stale),
            other => panic!("unexpected response {:?}", other),
        }
        let record = receiver.directory().get(&NodeId::from(1u128)).unwrap();
        assert_eq!(record.sequence, 5);
        assert_eq!(receiver.stats().stale, 1);
    }

    #[test]
    fn test_unknown_peer_is_asked_to_reregister() {
        let receiver = receiver();
        match receiver.handle(RpcRequest::Heartbeat(heartbeat(8, 1)), Instant::now()) {
            RpcResponse::Heartbeat(response) => {
                assert!(response.needs_reregister);
                assert!(!response.stale);
            }
            other => panic!("unexpected response {:?}", other),
        }
        assert!(receiver.directory().is_empty());
        assert_eq!(receiver.stats().unknown, 1);
    }

    #[test]
    fn test_config_deltas_only_when_behind() {
        let receiver = receiver();
        let now = Instant::now();
        receiver.handle(RpcRequest::Register(registration(1)), now);
        let version = receiver.set_flag("heartbeat_interval_ms", "500");
        assert_eq!(version, 1);

        let response = receiver.receive_heartbeat(&heartbeat(1, 1), now).unwrap();
        assert_eq!(response.config_version, 1);
        assert_eq!(response.config_deltas.len(), 1);
        assert_eq!(response.config_deltas[0].value, "500");

        let mut up_to_date = heartbeat(1, 2);
        up_to_date.config_version = 1;
        let response = receiver.receive_heartbeat(&up_to_date, now).unwrap();
        assert!(response.config_deltas.is_empty());
    }

    #[tokio::test]
    async fn test_request_handler_round_trip() {
        let receiver = receiver();
        let mut hb = heartbeat(2, 1);
        hb.registration = Some(registration(2));
        let bytes = RpcRequest::Heartbeat(hb).serialize().unwrap();

        let reply = receiver.handle_request(&bytes).await.unwrap();
        match RpcResponse::deserialize(&reply).unwrap() {
            RpcResponse::Heartbeat(response) => assert_eq!(response.directory_version, 1),
            other => panic!("unexpected response {:?}", other),
        }
        let record = receiver.directory().get(&NodeId::from(2u128)).unwrap();
        assert_eq!(record.status, PeerStatus::Live);

        let garbage = receiver.handle_request(&[0xff, 0xfe]).await.unwrap();
        assert!(matches!(
            RpcResponse::deserialize(&garbage).unwrap(),
            RpcResponse::Error { .. }
        ));
    }
}
