//! Membership RPC messages
//!
//! Heartbeat and registration traffic between members and the directory
//! node. Bodies are bincode (big-endian, standard config) over the serde
//! derives; framing is handled by the transport.
use serde::{Deserialize, Serialize};

use super::record::{PeerRegistration, ReportedStatus, TabletSummary};
use crate::error::Result;
use crate::node::NodeId;
use crate::transport::ingestion_guard::MAX_DECODE_BYTES;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub node_id: NodeId,
    pub sequence: u64,
    pub reported_status: ReportedStatus,
    pub tablet_summary: TabletSummary,
    /// Present on the first heartbeat or after the directory asked for it
    pub registration: Option<PeerRegistration>,
    /// Last config version this member has applied
    pub config_version: u64,
}

/// One runtime flag pushed to members
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConfigDelta {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub directory_version: u64,
    pub config_version: u64,
    pub config_deltas: Vec<ConfigDelta>,
    /// The directory does not know this member; resend registration
    pub needs_reregister: bool,
    /// The heartbeat was a duplicate or arrived out of order and was ignored
    pub stale: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum RpcRequest {
    Register(PeerRegistration),
    Heartbeat(HeartbeatRequest),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum RpcResponse {
    Registered { directory_version: u64 },
    Heartbeat(HeartbeatResponse),
    Error { kind: String, message: String },
}

pub(crate) fn wire_config() -> bincode::config::Configuration<
    bincode::config::BigEndian,
    bincode::config::Varint,
    bincode::config::NoLimit,
> {
    bincode::config::standard().with_big_endian()
}

/// Length prefixes inside a body are untrusted; cap what they may claim
pub(crate) fn decode_config() -> impl bincode::config::Config {
    wire_config().with_limit::<{ MAX_DECODE_BYTES }>()
}

impl RpcRequest {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, wire_config())?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let (request, _) = bincode::serde::decode_from_slice(data, decode_config())?;
        Ok(request)
    }
}

impl RpcResponse {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, wire_config())?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let (response, _) = bincode::serde::decode_from_slice(data, decode_config())?;
        Ok(response)
    }

    pub fn error(err: &crate::error::MeridianError) -> Self {
        RpcResponse::Error {
            kind: err.error_type().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::membership::record::Placement;

    #[test]
    fn test_heartbeat_with_registration_survives_the_wire() {
        let registration = PeerRegistration {
            node_id: NodeId::from(3u128),
            primary: "10.1.0.3:9100".parse().unwrap(),
            broadcast: Some("34.1.2.3:9042".parse().unwrap()),
            placement: Placement::new("us-east", "1a"),
            tokens: BTreeSet::from(["-9223372036854775808".to_string()]),
            release_version: "2.20.0".to_string(),
        };
        let request = RpcRequest::Heartbeat(HeartbeatRequest {
            node_id: NodeId::from(3u128),
            sequence: 42,
            reported_status: ReportedStatus::Serving,
            tablet_summary: TabletSummary {
                tablet_count: 12,
                leader_count: 4,
            },
            registration: Some(registration),
            config_version: 7,
        });

        let bytes = request.serialize().expect("Failed to serialize request");
        let decoded = RpcRequest::deserialize(&bytes).expect("Failed to deserialize request");
        assert_eq!(decoded, request);
    }

    /// A Register body whose data_center claims `u64::MAX / 2` bytes
    fn register_with_bogus_length() -> Vec<u8> {
        let marker = "QQQQQQQQ";
        let registration = PeerRegistration {
            node_id: NodeId::from(5u128),
            primary: "10.1.0.5:9100".parse().unwrap(),
            broadcast: None,
            placement: Placement::new(marker, "r1"),
            tokens: BTreeSet::new(),
            release_version: "2.20.0".to_string(),
        };
        let bytes = RpcRequest::Register(registration).serialize().unwrap();
        let mut needle = vec![marker.len() as u8];
        needle.extend_from_slice(marker.as_bytes());
        let at = bytes
            .windows(needle.len())
            .position(|w| w == needle.as_slice())
            .unwrap();
        let mut body = bytes[..at].to_vec();
        // varint marker for a following u64
        body.push(253);
        body.extend_from_slice(&(u64::MAX / 2).to_be_bytes());
        body
    }

    #[test]
    fn test_length_prefix_over_decode_limit_is_an_error() {
        let body = register_with_bogus_length();
        assert!(body.len() < 64);
        assert!(matches!(
            RpcRequest::deserialize(&body),
            Err(crate::error::MeridianError::Serialization(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_a_decode_error() {
        let response = RpcResponse::Heartbeat(HeartbeatResponse {
            directory_version: 9,
            config_version: 2,
            config_deltas: vec![ConfigDelta {
                name: "heartbeat_interval_ms".into(),
                value: "500".into(),
            }],
            needs_reregister: false,
            stale: false,
        });
        let bytes = response.serialize().unwrap();
        let result = RpcResponse::deserialize(&bytes[..bytes.len() / 2]);
        assert!(matches!(
            result,
            Err(crate::error::MeridianError::Serialization(_))
        ));
    }
}
