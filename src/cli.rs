//! CLI for this application
//!
use std::net::SocketAddr;

use crate::node::NodeId;
use crate::resolver::PrivateAddressPolicy;
use crate::settings;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "meridian", version, about = "Node membership directory and system peer tables")]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("MERIDIAN_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("MERIDIAN_HTTP_LISTEN_PORT"),
        help = "Port to bind Meridian HTTP API server to"
    )]
    pub listen_port: u16,

    // TCP listen port for membership RPCs
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_TCP,
        env("MERIDIAN_TCP_LISTEN_PORT"),
        help = "Port to bind the heartbeat TCP server to"
    )]
    pub listen_port_tcp: u16,

    #[clap(
        long,
        env("MERIDIAN_NODE_ID"),
        help = "Host id (uuid) of this node; random when omitted"
    )]
    pub node_id: Option<NodeId>,

    #[clap(long, default_value = "datacenter1", env("MERIDIAN_DATA_CENTER"))]
    pub data_center: String,

    #[clap(long, default_value = "rack1", env("MERIDIAN_RACK"))]
    pub rack: String,

    #[clap(
        long,
        default_value = "127.0.0.1:9042",
        env("MERIDIAN_RPC_ADDRESS"),
        help = "Client-facing address announced to peers"
    )]
    pub rpc_address: SocketAddr,

    #[clap(
        long,
        env("MERIDIAN_BROADCAST_ADDRESS"),
        help = "Address announced to callers that can reach it, e.g. a public IP"
    )]
    pub broadcast_address: Option<SocketAddr>,

    #[clap(long, default_value = APP_VERSION, env("MERIDIAN_RELEASE_VERSION"))]
    pub release_version: String,

    #[clap(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        env("MERIDIAN_TOKENS"),
        help = "Ownership tokens of this node; one is synthesized when empty"
    )]
    pub tokens: Vec<String>,

    #[clap(
        long,
        default_value = "datacenter",
        env("MERIDIAN_PRIVATE_ADDRESS_POLICY"),
        help = "Who gets private addresses: 'never', 'rack', 'datacenter', or 'always'"
    )]
    pub private_address_policy: PrivateAddressPolicy,

    #[clap(
        long,
        default_value = settings::DEFAULT_HEARTBEAT_INTERVAL_MS,
        env("MERIDIAN_HEARTBEAT_INTERVAL_MS")
    )]
    pub heartbeat_interval_ms: u64,

    #[clap(
        long,
        env("MERIDIAN_HEARTBEAT_DEADLINE_MS"),
        help = "Silence before a peer is suspected (default 3x interval)"
    )]
    pub heartbeat_deadline_ms: Option<u64>,

    #[clap(
        long,
        env("MERIDIAN_EXTENDED_DEADLINE_MS"),
        help = "Silence before a peer is dead (default 10x interval)"
    )]
    pub extended_deadline_ms: Option<u64>,

    #[clap(
        long,
        env("MERIDIAN_TOMBSTONE_RETENTION_MS"),
        help = "How long dead peers stay listed (default 60s)"
    )]
    pub tombstone_retention_ms: Option<u64>,

    #[clap(
        long,
        default_value = settings::DEFAULT_TICK_INTERVAL_MS,
        env("MERIDIAN_TICK_INTERVAL_MS")
    )]
    pub tick_interval_ms: u64,

    #[clap(
        long,
        default_value = "65536",
        env("MERIDIAN_SKIP_CAPACITY"),
        help = "Bytes per read when draining oversized frames"
    )]
    pub skip_capacity: usize,

    #[clap(long, default_value = "4194304", env("MERIDIAN_MAX_FRAME_SIZE"))]
    pub max_frame_size: usize,

    #[clap(
        long,
        default_value = "67108864",
        env("MERIDIAN_MAX_DRAIN"),
        help = "Largest oversized frame drained before the connection is closed"
    )]
    pub max_drain: usize,

    #[clap(
        long,
        default_value = settings::DEFAULT_REQUEST_TIMEOUT_MS,
        env("MERIDIAN_REQUEST_TIMEOUT_MS")
    )]
    pub request_timeout_ms: u64,

    #[clap(
        long,
        env("MERIDIAN_DIRECTORY"),
        help = "Heartbeat TCP address of a directory node to report to"
    )]
    pub directory: Option<SocketAddr>,

    #[clap(long, env("MERIDIAN_LOG_JSON"), help = "Log as JSON lines")]
    pub log_json: bool,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            listen_port_tcp: self.listen_port_tcp,
            node_id: self.node_id.unwrap_or_else(NodeId::random),
            data_center: self.data_center,
            rack: self.rack,
            rpc_address: self.rpc_address,
            broadcast_address: self.broadcast_address,
            release_version: self.release_version,
            tokens: self.tokens.into_iter().filter(|t| !t.is_empty()).collect(),
            private_address_policy: self.private_address_policy,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_deadline_ms: self.heartbeat_deadline_ms,
            extended_deadline_ms: self.extended_deadline_ms,
            tombstone_retention_ms: self.tombstone_retention_ms,
            tick_interval_ms: self.tick_interval_ms,
            skip_capacity: self.skip_capacity,
            max_frame_size: self.max_frame_size,
            max_drain: self.max_drain,
            request_timeout_ms: self.request_timeout_ms,
            directory: self.directory,
        }
    }
}
