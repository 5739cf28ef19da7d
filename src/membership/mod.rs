//! Peer membership: the directory, its state machine, and the heartbeat
//! RPCs that feed it.

pub mod directory;
pub mod heartbeat;
pub mod heartbeater;
pub mod messages;
pub mod record;

pub use directory::{
    DirectorySnapshot, HeartbeatApplied, MembershipConfig, PeerDirectory, TickReport,
};
pub use heartbeat::{FrozenHeartbeatStats, HeartbeatReceiver, RuntimeFlags};
pub use heartbeater::Heartbeater;
pub use messages::{ConfigDelta, HeartbeatRequest, HeartbeatResponse, RpcRequest, RpcResponse};
pub use record::{
    PeerRecord, PeerRegistration, PeerStatus, Placement, ReportedStatus, TabletSummary,
};
