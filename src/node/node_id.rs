use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for cluster nodes (the `host_id` of the peer relations)
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Fresh random identity, used when no id is configured
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        NodeId(id)
    }
}

impl From<u128> for NodeId {
    fn from(id: u128) -> Self {
        NodeId(Uuid::from_u128(id))
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(NodeId)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id: NodeId = "6f1c8c36-2a8b-4b3e-9a5e-2f0d0c5c1a11".parse().unwrap();
        assert_eq!(id.to_string(), "6f1c8c36-2a8b-4b3e-9a5e-2f0d0c5c1a11");
        assert!("not-a-uuid".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_ordering_follows_uuid() {
        let a = NodeId::from(1u128);
        let b = NodeId::from(2u128);
        assert!(a < b);
        assert_ne!(NodeId::random(), NodeId::random());
    }
}
