//! Meridian application settings
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;
use crate::membership::directory::MembershipConfig;
use crate::membership::record::{PeerRegistration, Placement};
use crate::node::NodeId;
use crate::resolver::PrivateAddressPolicy;
use crate::transport::IngestionLimits;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8510;
pub const DEFAULT_PORT_HTTP: &str = "8510";
pub const STANDARD_PORT_TCP: u16 = 8511;
pub const DEFAULT_PORT_TCP: &str = "8511";

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: &str = "1000";
pub const DEFAULT_TICK_INTERVAL_MS: &str = "500";
pub const DEFAULT_REQUEST_TIMEOUT_MS: &str = "5000";

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // TCP listen port for membership RPCs
    pub listen_port_tcp: u16,

    // Identity and placement of this node
    pub node_id: NodeId,
    pub data_center: String,
    pub rack: String,
    pub rpc_address: SocketAddr,
    pub broadcast_address: Option<SocketAddr>,
    pub release_version: String,
    pub tokens: BTreeSet<String>,

    // Which peers get private addresses
    pub private_address_policy: PrivateAddressPolicy,

    // Liveness timing
    pub heartbeat_interval_ms: u64,
    pub heartbeat_deadline_ms: Option<u64>,
    pub extended_deadline_ms: Option<u64>,
    pub tombstone_retention_ms: Option<u64>,
    pub tick_interval_ms: u64,

    // Ingestion guard
    pub skip_capacity: usize,
    pub max_frame_size: usize,
    pub max_drain: usize,

    // Deadline for one virtual table read
    pub request_timeout_ms: u64,

    // Directory node to heartbeat into; none means this node only serves
    pub directory: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        let limits = IngestionLimits::default();
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_HTTP,
            listen_port_tcp: STANDARD_PORT_TCP,
            node_id: NodeId::random(),
            data_center: "datacenter1".to_string(),
            rack: "rack1".to_string(),
            rpc_address: SocketAddr::from(([127, 0, 0, 1], 9042)),
            broadcast_address: None,
            release_version: APP_VERSION.to_string(),
            tokens: BTreeSet::new(),
            private_address_policy: PrivateAddressPolicy::default(),
            heartbeat_interval_ms: 1000,
            heartbeat_deadline_ms: None,
            extended_deadline_ms: None,
            tombstone_retention_ms: None,
            tick_interval_ms: 500,
            skip_capacity: limits.skip_capacity,
            max_frame_size: limits.max_frame_size,
            max_drain: limits.max_drain,
            request_timeout_ms: 5000,
            directory: None,
        }
    }
}

impl Settings {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn placement(&self) -> Placement {
        Placement::new(self.data_center.clone(), self.rack.clone())
    }

    /// Deadlines not given explicitly are derived from the interval
    pub fn membership_config(&self) -> Result<MembershipConfig> {
        let mut config =
            MembershipConfig::from_interval(Duration::from_millis(self.heartbeat_interval_ms));
        if let Some(ms) = self.heartbeat_deadline_ms {
            config.heartbeat_deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = self.extended_deadline_ms {
            config.extended_deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = self.tombstone_retention_ms {
            config.tombstone_retention = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn ingestion_limits(&self) -> IngestionLimits {
        IngestionLimits {
            skip_capacity: self.skip_capacity,
            max_frame_size: self.max_frame_size,
            max_drain: self.max_drain,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn http_bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_address, self.listen_port)
            .parse()
            .map_err(|e| crate::config_error!("bad HTTP listen address: {}", e))
    }

    pub fn tcp_bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_address, self.listen_port_tcp)
            .parse()
            .map_err(|e| crate::config_error!("bad TCP listen address: {}", e))
    }

    /// What this node announces about itself
    pub fn registration(&self) -> PeerRegistration {
        PeerRegistration {
            node_id: self.node_id,
            primary: self.rpc_address,
            broadcast: self.broadcast_address,
            placement: self.placement(),
            tokens: self.tokens.clone(),
            release_version: self.release_version.clone(),
        }
    }

    /// Reject inconsistent settings before anything binds
    pub fn validate(&self) -> Result<()> {
        self.membership_config()?;
        if self.tick_interval_ms == 0 {
            return Err(crate::config_error!("tick interval must be nonzero"));
        }
        if self.request_timeout_ms == 0 {
            return Err(crate::config_error!("request timeout must be nonzero"));
        }
        crate::transport::IngestionGuard::new(self.ingestion_limits())?;
        self.http_bind_addr()?;
        self.tcp_bind_addr()?;
        Ok(())
    }
}
