use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian::error::MeridianError;
use meridian::membership::{
    HeartbeatReceiver, HeartbeatRequest, MembershipConfig, PeerDirectory, PeerRegistration,
    PeerStatus, Placement, ReportedStatus, RpcRequest, RpcResponse, TabletSummary,
};
use meridian::node::NodeId;

const INTERVAL: Duration = Duration::from_millis(100);

fn registration(id: u128) -> PeerRegistration {
    PeerRegistration {
        node_id: NodeId::from(id),
        primary: format!("10.0.0.{}:9042", id).parse().unwrap(),
        broadcast: None,
        placement: Placement::new("dc1", "r1"),
        tokens: BTreeSet::new(),
        release_version: "2.20.0".into(),
    }
}

fn heartbeat(id: u128, sequence: u64) -> HeartbeatRequest {
    HeartbeatRequest {
        node_id: NodeId::from(id),
        sequence,
        reported_status: ReportedStatus::Serving,
        tablet_summary: TabletSummary {
            tablet_count: 12,
            leader_count: 4,
        },
        registration: None,
        config_version: 0,
    }
}

fn receiver() -> HeartbeatReceiver {
    HeartbeatReceiver::new(Arc::new(PeerDirectory::new(MembershipConfig::from_interval(
        INTERVAL,
    ))))
}

#[test]
fn test_late_heartbeat_is_stale_and_ignored() {
    let receiver = receiver();
    let directory = receiver.directory().clone();
    let now = Instant::now();
    directory.register(registration(1), now);

    receiver.receive_heartbeat(&heartbeat(1, 5), now).unwrap();
    let version = directory.version();

    let err = receiver.receive_heartbeat(&heartbeat(1, 3), now).unwrap_err();
    assert!(matches!(
        err,
        MeridianError::StalePeerUpdate {
            current: 5,
            received: 3,
            ..
        }
    ));
    let record = directory.get(&NodeId::from(1u128)).unwrap();
    assert_eq!(record.sequence, 5);
    assert_eq!(directory.version(), version);

    // over RPC the stale delivery is answered, not failed
    match receiver.handle(RpcRequest::Heartbeat(heartbeat(1, 4)), now) {
        RpcResponse::Heartbeat(response) => assert!(response.stale),
        other => panic!("unexpected response {:?}", other),
    }
    assert_eq!(receiver.stats().stale, 1);
}

#[test]
fn test_liveness_lifecycle() {
    let receiver = receiver();
    let directory = receiver.directory().clone();
    let config = *directory.config();
    let start = Instant::now();
    let id = NodeId::from(1u128);

    directory.register(registration(1), start);
    assert_eq!(directory.get(&id).unwrap().status, PeerStatus::Bootstrapping);

    receiver.receive_heartbeat(&heartbeat(1, 1), start).unwrap();
    assert_eq!(directory.get(&id).unwrap().status, PeerStatus::Live);

    // just short of the deadline nothing happens
    directory.tick(start + config.heartbeat_deadline - Duration::from_millis(1));
    assert_eq!(directory.get(&id).unwrap().status, PeerStatus::Live);

    let report = directory.tick(start + config.heartbeat_deadline);
    assert_eq!(report.suspected, vec![id]);
    assert_eq!(directory.get(&id).unwrap().status, PeerStatus::Suspect);

    // suspicion clears on any valid heartbeat
    let revived = start + config.heartbeat_deadline + Duration::from_millis(10);
    receiver.receive_heartbeat(&heartbeat(1, 2), revived).unwrap();
    assert_eq!(directory.get(&id).unwrap().status, PeerStatus::Live);

    directory.tick(revived + config.heartbeat_deadline);
    let died_at = revived + config.extended_deadline;
    let report = directory.tick(died_at);
    assert_eq!(report.dead, vec![id]);
    assert_eq!(directory.get(&id).unwrap().status, PeerStatus::Dead);

    // tombstone kept until retention elapses, then purged
    directory.tick(died_at + config.tombstone_retention - Duration::from_millis(1));
    assert!(directory.get(&id).is_some());
    let report = directory.tick(died_at + config.tombstone_retention);
    assert_eq!(report.purged, vec![id]);
    assert!(directory.get(&id).is_none());
}

#[test]
fn test_dead_peer_revives_on_heartbeat() {
    let receiver = receiver();
    let directory = receiver.directory().clone();
    let config = *directory.config();
    let start = Instant::now();

    directory.register(registration(1), start);
    receiver.receive_heartbeat(&heartbeat(1, 1), start).unwrap();
    directory.tick(start + config.extended_deadline);
    assert_eq!(
        directory.get(&NodeId::from(1u128)).unwrap().status,
        PeerStatus::Dead
    );

    let later = start + config.extended_deadline + Duration::from_millis(5);
    let applied = directory.apply_heartbeat(&heartbeat(1, 2), later).unwrap();
    assert_eq!(applied.previous_status, Some(PeerStatus::Dead));
    assert_eq!(applied.record.status, PeerStatus::Live);
    assert!(applied.record.dead_since.is_none());
}

#[test]
fn test_unknown_peer_asked_to_reregister() {
    let receiver = receiver();
    let now = Instant::now();

    match receiver.handle(RpcRequest::Heartbeat(heartbeat(9, 1)), now) {
        RpcResponse::Heartbeat(response) => {
            assert!(response.needs_reregister);
            assert!(!response.stale);
        }
        other => panic!("unexpected response {:?}", other),
    }
    assert!(receiver.directory().is_empty());

    let mut with_registration = heartbeat(9, 2);
    with_registration.registration = Some(registration(9));
    match receiver.handle(RpcRequest::Heartbeat(with_registration), now) {
        RpcResponse::Heartbeat(response) => assert!(!response.needs_reregister),
        other => panic!("unexpected response {:?}", other),
    }
    let record = receiver.directory().get(&NodeId::from(9u128)).unwrap();
    assert_eq!(record.status, PeerStatus::Live);
    assert_eq!(record.tablet_summary.leader_count, 4);
}

#[test]
fn test_reregistration_keeps_sequence() {
    let receiver = receiver();
    let directory = receiver.directory().clone();
    let now = Instant::now();

    directory.register(registration(1), now);
    receiver.receive_heartbeat(&heartbeat(1, 7), now).unwrap();

    let mut moved = registration(1);
    moved.placement = Placement::new("dc2", "r5");
    receiver.handle(RpcRequest::Register(moved), now);

    let record = directory.get(&NodeId::from(1u128)).unwrap();
    assert_eq!(record.sequence, 7);
    assert_eq!(record.placement, Placement::new("dc2", "r5"));
    assert!(receiver.receive_heartbeat(&heartbeat(1, 7), now).is_err());
}

#[test]
fn test_config_deltas_follow_version() {
    let receiver = receiver();
    let now = Instant::now();
    receiver.directory().register(registration(1), now);
    let version = receiver.set_flag("heartbeat_interval_ms", "500");

    let response = receiver.receive_heartbeat(&heartbeat(1, 1), now).unwrap();
    assert_eq!(response.config_version, version);
    assert_eq!(response.config_deltas.len(), 1);
    assert_eq!(response.config_deltas[0].value, "500");

    let mut caught_up = heartbeat(1, 2);
    caught_up.config_version = version;
    let response = receiver.receive_heartbeat(&caught_up, now).unwrap();
    assert!(response.config_deltas.is_empty());
}

#[test]
fn test_snapshot_isolated_from_later_heartbeats() {
    let receiver = receiver();
    let directory = receiver.directory().clone();
    let now = Instant::now();
    directory.register(registration(1), now);
    receiver.receive_heartbeat(&heartbeat(1, 1), now).unwrap();

    let snapshot = directory.snapshot();
    receiver.receive_heartbeat(&heartbeat(1, 2), now).unwrap();
    directory.register(registration(2), now);

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get(&NodeId::from(1u128)).unwrap().sequence, 1);
    assert!(directory.version() > snapshot.version);
}

#[test]
fn test_independent_peers_update_concurrently() {
    let receiver = receiver();
    let directory = receiver.directory().clone();
    let now = Instant::now();
    for id in 1..=8u128 {
        directory.register(registration(id), now);
    }

    std::thread::scope(|scope| {
        for id in 1..=8u128 {
            let receiver = receiver.clone();
            scope.spawn(move || {
                for sequence in 1..=200u64 {
                    receiver
                        .receive_heartbeat(&heartbeat(id, sequence), now)
                        .unwrap();
                }
            });
        }
    });

    for id in 1..=8u128 {
        assert_eq!(directory.get(&NodeId::from(id)).unwrap().sequence, 200);
    }
}
