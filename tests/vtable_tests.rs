use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian::membership::{
    HeartbeatRequest, MembershipConfig, PeerDirectory, PeerRegistration, PeerStatus, Placement,
    ReportedStatus, TabletSummary,
};
use meridian::node::NodeId;
use meridian::resolver::{PrivateAddressPolicy, Resolver};
use meridian::vtable::{
    PagingState, PeersVTable, QlValue, ReadRequest, SystemTables,
};
use uuid::Uuid;

fn config() -> MembershipConfig {
    MembershipConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_deadline: Duration::from_millis(300),
        extended_deadline: Duration::from_secs(1),
        tombstone_retention: Duration::from_secs(2),
    }
}

fn registration(id: u128, ip: &str) -> PeerRegistration {
    PeerRegistration {
        node_id: NodeId::from(id),
        primary: format!("{}:9042", ip).parse().unwrap(),
        broadcast: None,
        placement: Placement::new("dc1", "r1"),
        tokens: BTreeSet::new(),
        release_version: "2.20.0".into(),
    }
}

fn beat(directory: &PeerDirectory, id: u128, sequence: u64, at: Instant) {
    directory
        .apply_heartbeat(
            &HeartbeatRequest {
                node_id: NodeId::from(id),
                sequence,
                reported_status: ReportedStatus::Serving,
                tablet_summary: TabletSummary::default(),
                registration: None,
                config_version: 0,
            },
            at,
        )
        .unwrap();
}

fn host_ids(rows: &meridian::vtable::RowBlock) -> Vec<Uuid> {
    rows.column_values("host_id")
        .map(|v| match v {
            QlValue::Uuid(id) => *id,
            other => panic!("host_id is {:?}", other),
        })
        .collect()
}

const A: u128 = 0xa;
const B: u128 = 0xb;
const C: u128 = 0xc;
const D: u128 = 0xd;

/// Serving node id outside every directory built here
fn serving() -> NodeId {
    NodeId::from(0u128)
}

#[test]
fn test_peers_scenario_excludes_tombstone_and_requester() {
    let directory = Arc::new(PeerDirectory::new(config()));
    let start = Instant::now();
    directory.register(registration(A, "10.0.0.20"), start);
    directory.register(registration(B, "10.0.0.10"), start);
    directory.register(registration(C, "10.0.0.5"), start);
    directory.register(registration(D, "10.0.0.1"), start);

    beat(&directory, C, 1, start);
    beat(&directory, B, 1, start);
    beat(&directory, D, 1, start);
    let one_second = start + Duration::from_secs(1);
    beat(&directory, A, 4, one_second);
    beat(&directory, B, 2, one_second);
    beat(&directory, D, 2, one_second);
    directory.tick(one_second);
    assert_eq!(directory.get(&NodeId::from(C)).unwrap().status, PeerStatus::Dead);

    let suspect_at = one_second + Duration::from_millis(300);
    beat(&directory, A, 5, suspect_at);
    beat(&directory, D, 3, suspect_at);
    directory.tick(suspect_at);
    assert_eq!(directory.get(&NodeId::from(B)).unwrap().status, PeerStatus::Suspect);
    assert_eq!(directory.get(&NodeId::from(A)).unwrap().sequence, 5);

    let table = PeersVTable::new(
        directory.clone(),
        Resolver::new(PrivateAddressPolicy::Always),
        NodeId::from(A),
    )
    .unwrap();
    let request = ReadRequest {
        requester: Some(NodeId::from(D)),
        ..ReadRequest::default()
    };
    // C entered DEAD at one_second; judge it past retention
    let now = one_second + Duration::from_millis(2500);
    let response = table
        .materialize(&directory.snapshot(), &request, now)
        .unwrap();

    assert_eq!(
        host_ids(&response.rows),
        vec![Uuid::from_u128(B), Uuid::from_u128(A)]
    );
    assert!(response.paging_state.is_none());
}

#[test]
fn test_requester_never_listed() {
    let directory = Arc::new(PeerDirectory::new(config()));
    let now = Instant::now();
    for id in 1..=5u128 {
        directory.register(registration(id, &format!("10.1.0.{}", id)), now);
        beat(&directory, id, 1, now);
    }
    let resolver = Resolver::new(PrivateAddressPolicy::Always);
    let tables = SystemTables::standard(directory, resolver, NodeId::from(1u128)).unwrap();
    let peers = tables.get("system.peers").unwrap();

    for requester in 1..=5u128 {
        let response = peers
            .retrieve_data(&ReadRequest {
                requester: Some(NodeId::from(requester)),
                ..ReadRequest::default()
            })
            .unwrap();
        let ids = host_ids(&response.rows);
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&Uuid::from_u128(requester)));
    }
}

#[test]
fn test_pagination_survives_directory_changes() {
    let directory = Arc::new(PeerDirectory::new(config()));
    let now = Instant::now();
    for id in 10..20u128 {
        directory.register(registration(id, &format!("10.2.0.{}", id)), now);
        beat(&directory, id, 1, now);
    }
    let table = PeersVTable::new(
        directory.clone(),
        Resolver::new(PrivateAddressPolicy::Always),
        serving(),
    )
    .unwrap();

    let mut seen: HashMap<Uuid, usize> = HashMap::new();
    let mut paging_state: Option<PagingState> = None;
    let mut next_id = 100u128;
    loop {
        let response = table
            .retrieve_data(&ReadRequest {
                limit: Some(3),
                paging_state: paging_state.take(),
                ..ReadRequest::default()
            })
            .unwrap();
        assert!(response.rows.len() <= 3);
        for id in host_ids(&response.rows) {
            *seen.entry(id).or_default() += 1;
        }

        // peers join on both sides of the cursor and heartbeats keep coming
        for ip in ["10.2.0.1", "10.2.0.250"] {
            directory.register(registration(next_id, ip), now);
            beat(&directory, next_id, 1, now);
            next_id += 1;
        }
        for id in 10..20u128 {
            beat(&directory, id, next_id as u64, now);
        }

        match response.paging_state {
            Some(state) => {
                // continuation tokens survive an opaque round trip
                let bytes = state.encode().unwrap();
                paging_state = Some(PagingState::decode(&bytes).unwrap());
            }
            None => break,
        }
    }

    for id in 10..20u128 {
        assert_eq!(seen.get(&Uuid::from_u128(id)), Some(&1), "peer {} not seen once", id);
    }
    assert!(seen.values().all(|count| *count == 1));
}

#[test]
fn test_token_from_other_table_rejected() {
    let directory = Arc::new(PeerDirectory::new(config()));
    let table = PeersVTable::new(directory, Resolver::default(), serving()).unwrap();
    let state = PagingState {
        table: "system.local".into(),
        last_key: meridian::vtable::RowKey {
            address: "10.0.0.1:9042".parse().unwrap(),
            host_id: NodeId::from(1u128),
        },
        snapshot_version: 0,
    };
    let request = ReadRequest {
        paging_state: Some(state),
        ..ReadRequest::default()
    };
    assert!(table.retrieve_data(&request).is_err());
}

#[test]
fn test_cross_dc_caller_sees_broadcast_addresses() {
    let directory = Arc::new(PeerDirectory::new(config()));
    let now = Instant::now();
    let mut reg = registration(1, "10.0.0.1");
    reg.broadcast = Some("34.1.1.1:9042".parse().unwrap());
    directory.register(reg, now);
    beat(&directory, 1, 1, now);
    // private only, unreachable from another data center
    directory.register(registration(2, "10.0.0.2"), now);
    beat(&directory, 2, 1, now);

    let table = PeersVTable::new(directory, Resolver::default(), serving()).unwrap();
    let response = table
        .retrieve_data(&ReadRequest {
            caller_data_center: Some("dc2".into()),
            ..ReadRequest::default()
        })
        .unwrap();
    assert_eq!(host_ids(&response.rows), vec![Uuid::from_u128(1)]);
    assert_eq!(
        response.rows.value(0, "rpc_address"),
        Some(&QlValue::Inet("34.1.1.1".parse().unwrap()))
    );
    assert_eq!(
        response.rows.value(0, "peer"),
        Some(&QlValue::Inet("10.0.0.1".parse().unwrap()))
    );
}
