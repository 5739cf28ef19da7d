//! Membership RPC transport
//!
//! Length-prefixed TCP frames, request/response. Inbound frame sizes are
//! bounded by the [`IngestionGuard`].

pub mod frame;
pub mod ingestion_guard;
pub mod stats;
pub mod tcp_client;
pub mod tcp_receiver;
pub mod traits;

pub use ingestion_guard::{FrameDisposition, IngestionGuard, IngestionLimits, SkipBuffer};
pub use stats::{FrozenReceiverStats, ReceiverStats};
pub use tcp_client::TcpClient;
pub use tcp_receiver::TcpReceiver;
pub use traits::RequestHandler;
