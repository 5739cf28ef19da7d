//! Address Resolver
//!
//! Turns a directory record into the endpoint a given caller can connect
//! to. Pure: no I/O, no shared state, same answer for the same inputs.
//!
//! The broadcast endpoint is preferred whenever the caller can reach it;
//! the primary (listen) endpoint is the fallback. Reachability depends on
//! the address scope and on how far the caller sits from the peer.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{MeridianError, Result};
use crate::membership::record::{PeerRecord, Placement};

/// Distance between caller and peer
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum NetworkClass {
    SameRack,
    SameDataCenter,
    CrossDataCenter,
    Unknown,
}

/// Where private addresses may be handed out
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum PrivateAddressPolicy {
    Never,
    Rack,
    #[default]
    DataCenter,
    Always,
}

impl std::str::FromStr for PrivateAddressPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(PrivateAddressPolicy::Never),
            "rack" => Ok(PrivateAddressPolicy::Rack),
            "datacenter" | "dc" => Ok(PrivateAddressPolicy::DataCenter),
            "always" => Ok(PrivateAddressPolicy::Always),
            _ => Err(format!("Invalid private address policy: {}", s)),
        }
    }
}

/// Who is asking, as far as we know
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CallerContext {
    pub placement: Option<Placement>,
    pub remote: Option<IpAddr>,
}

impl CallerContext {
    pub fn network_class(&self, target: &Placement) -> NetworkClass {
        match &self.placement {
            None => NetworkClass::Unknown,
            Some(own) if own.data_center != target.data_center => NetworkClass::CrossDataCenter,
            Some(own) if own.rack == target.rack => NetworkClass::SameRack,
            Some(_) => NetworkClass::SameDataCenter,
        }
    }

    fn is_local(&self) -> bool {
        self.remote.is_some_and(|ip| ip.is_loopback())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AddressScope {
    Unusable,
    Loopback,
    Private,
    Public,
}

fn ipv4_scope(ip: &Ipv4Addr) -> AddressScope {
    let octets = ip.octets();
    if ip.is_unspecified() || ip.is_multicast() || ip.is_broadcast() {
        AddressScope::Unusable
    } else if ip.is_loopback() {
        AddressScope::Loopback
    } else if ip.is_private()
        || ip.is_link_local()
        // carrier-grade NAT, 100.64.0.0/10
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
    {
        AddressScope::Private
    } else {
        AddressScope::Public
    }
}

fn ipv6_scope(ip: &Ipv6Addr) -> AddressScope {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return ipv4_scope(&v4);
    }
    let first = ip.segments()[0];
    if ip.is_unspecified() || ip.is_multicast() {
        AddressScope::Unusable
    } else if ip.is_loopback() {
        AddressScope::Loopback
    } else if (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80 {
        AddressScope::Private
    } else {
        AddressScope::Public
    }
}

fn scope_of(addr: &SocketAddr) -> AddressScope {
    if addr.port() == 0 {
        return AddressScope::Unusable;
    }
    match addr.ip() {
        IpAddr::V4(ip) => ipv4_scope(&ip),
        IpAddr::V6(ip) => ipv6_scope(&ip),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Resolver {
    policy: PrivateAddressPolicy,
}

impl Resolver {
    pub fn new(policy: PrivateAddressPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PrivateAddressPolicy {
        self.policy
    }

    fn private_reachable(&self, class: NetworkClass) -> bool {
        match self.policy {
            PrivateAddressPolicy::Never => false,
            PrivateAddressPolicy::Rack => class == NetworkClass::SameRack,
            PrivateAddressPolicy::DataCenter => {
                matches!(class, NetworkClass::SameRack | NetworkClass::SameDataCenter)
            }
            PrivateAddressPolicy::Always => true,
        }
    }

    fn reachable(&self, addr: &SocketAddr, class: NetworkClass, caller: &CallerContext) -> bool {
        match scope_of(addr) {
            AddressScope::Unusable => false,
            AddressScope::Loopback => caller.is_local(),
            AddressScope::Private => self.private_reachable(class) || caller.is_local(),
            AddressScope::Public => true,
        }
    }

    /// Endpoint for `record` as seen from `caller`
    pub fn resolve(&self, record: &PeerRecord, caller: &CallerContext) -> Result<SocketAddr> {
        let class = caller.network_class(&record.placement);
        if let Some(broadcast) = record.broadcast {
            if self.reachable(&broadcast, class, caller) {
                return Ok(broadcast);
            }
        }
        if self.reachable(&record.primary, class, caller) {
            return Ok(record.primary);
        }
        Err(MeridianError::ResolutionFailure {
            node_id: record.node_id,
            reason: format!(
                "no endpoint reachable from a {:?} caller (primary {}, broadcast {})",
                class,
                record.primary,
                record
                    .broadcast
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "none".to_string())
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Instant;

    use super::*;
    use crate::membership::record::PeerRegistration;
    use crate::node::NodeId;

    fn record(primary: &str, broadcast: Option<&str>) -> PeerRecord {
        PeerRecord::bootstrapping(
            PeerRegistration {
                node_id: NodeId::from(1u128),
                primary: primary.parse().unwrap(),
                broadcast: broadcast.map(|b| b.parse().unwrap()),
                placement: Placement::new("dc1", "r1"),
                tokens: BTreeSet::new(),
                release_version: "2.20.0".into(),
            },
            Instant::now(),
        )
    }

    fn caller(dc: &str, rack: &str) -> CallerContext {
        CallerContext {
            placement: Some(Placement::new(dc, rack)),
            remote: None,
        }
    }

    #[test]
    fn test_network_class() {
        let target = Placement::new("dc1", "r1");
        assert_eq!(caller("dc1", "r1").network_class(&target), NetworkClass::SameRack);
        assert_eq!(caller("dc1", "r2").network_class(&target), NetworkClass::SameDataCenter);
        assert_eq!(caller("dc2", "r1").network_class(&target), NetworkClass::CrossDataCenter);
        assert_eq!(CallerContext::default().network_class(&target), NetworkClass::Unknown);
    }

    #[test]
    fn test_broadcast_preferred_when_reachable() {
        let resolver = Resolver::default();
        let peer = record("10.0.0.5:9042", Some("34.1.1.5:9042"));
        let addr = resolver.resolve(&peer, &caller("dc1", "r1")).unwrap();
        assert_eq!(addr, "34.1.1.5:9042".parse().unwrap());
    }

    #[test]
    fn test_private_broadcast_falls_back_for_remote_callers() {
        let resolver = Resolver::default();
        // broadcast is private, primary is public
        let peer = record("34.1.1.5:9042", Some("10.0.0.5:9042"));
        assert_eq!(
            resolver.resolve(&peer, &caller("dc2", "r1")).unwrap(),
            "34.1.1.5:9042".parse().unwrap()
        );
        assert_eq!(
            resolver.resolve(&peer, &caller("dc1", "r9")).unwrap(),
            "10.0.0.5:9042".parse().unwrap()
        );
    }

    #[test]
    fn test_unreachable_private_peer_fails() {
        let resolver = Resolver::default();
        let peer = record("10.0.0.5:9042", None);
        let err = resolver.resolve(&peer, &caller("dc2", "r1")).unwrap_err();
        assert!(matches!(err, MeridianError::ResolutionFailure { .. }));
        assert!(resolver.resolve(&peer, &CallerContext::default()).is_err());
    }

    #[test]
    fn test_policy_controls_private_reach() {
        let peer = record("10.0.0.5:9042", None);
        let same_dc = caller("dc1", "r2");
        assert!(Resolver::new(PrivateAddressPolicy::Rack).resolve(&peer, &same_dc).is_err());
        assert!(Resolver::new(PrivateAddressPolicy::Never)
            .resolve(&peer, &caller("dc1", "r1"))
            .is_err());
        assert!(Resolver::new(PrivateAddressPolicy::Always)
            .resolve(&peer, &caller("dc9", "r1"))
            .is_ok());
    }

    #[test]
    fn test_unusable_endpoints() {
        let resolver = Resolver::new(PrivateAddressPolicy::Always);
        assert!(resolver.resolve(&record("0.0.0.0:9042", None), &caller("dc1", "r1")).is_err());
        assert!(resolver.resolve(&record("34.1.1.5:0", None), &caller("dc1", "r1")).is_err());
        assert!(resolver.resolve(&record("[fe80::1]:9042", None), &caller("dc1", "r1")).is_ok());
    }

    #[test]
    fn test_loopback_only_for_local_callers() {
        let resolver = Resolver::default();
        let peer = record("127.0.0.2:9042", None);
        assert!(resolver.resolve(&peer, &caller("dc1", "r1")).is_err());
        let local = CallerContext {
            placement: None,
            remote: Some("127.0.0.1".parse().unwrap()),
        };
        assert_eq!(
            resolver.resolve(&peer, &local).unwrap(),
            "127.0.0.2:9042".parse().unwrap()
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = Resolver::default();
        let peer = record("10.0.0.5:9042", Some("34.1.1.5:9042"));
        let ctx = caller("dc2", "r1");
        let first = resolver.resolve(&peer, &ctx).unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&peer, &ctx).unwrap(), first);
        }
    }
}
