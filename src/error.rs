use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::node::NodeId;

/// Main error type for the Meridian membership service
#[derive(Debug)]
pub enum MeridianError {
    /// An RPC frame declared more bytes than the configured hard limit.
    /// Only the offending call is aborted.
    PayloadTooLarge { declared: usize, limit: usize },

    /// Duplicate or out-of-order heartbeat; the record was left unchanged
    StalePeerUpdate {
        node_id: NodeId,
        current: u64,
        received: u64,
    },

    /// A system relation could not be registered with its wire schema
    SchemaMismatch(String),

    /// No connectable endpoint for a peer given the caller's context
    ResolutionFailure { node_id: NodeId, reason: String },

    /// Directory snapshot could not be taken in time; retryable
    DirectorySnapshotUnavailable(String),

    /// Heartbeat for a peer the directory does not know
    UnknownPeer(NodeId),

    /// Configuration or CLI argument errors
    Config(String),

    /// API/HTTP related errors
    Api(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Transport layer errors
    Transport(String),

    /// Serialization/deserialization errors
    Serialization(SerializationError),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization/deserialization errors
    Json(serde_json::Error),

    /// Binary encoding errors
    BinaryEncode(bincode::error::EncodeError),

    /// Binary decoding errors
    BinaryDecode(bincode::error::DecodeError),
}

impl fmt::Display for MeridianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeridianError::PayloadTooLarge { declared, limit } => write!(
                f,
                "Payload too large: {} bytes declared, limit is {} bytes",
                declared, limit
            ),
            MeridianError::StalePeerUpdate {
                node_id,
                current,
                received,
            } => write!(
                f,
                "Stale peer update for {}: received sequence {} but already at {}",
                node_id, received, current
            ),
            MeridianError::SchemaMismatch(msg) => write!(f, "Schema mismatch: {}", msg),
            MeridianError::ResolutionFailure { node_id, reason } => {
                write!(f, "Resolution failure for {}: {}", node_id, reason)
            }
            MeridianError::DirectorySnapshotUnavailable(msg) => {
                write!(f, "Directory snapshot unavailable: {}", msg)
            }
            MeridianError::UnknownPeer(node_id) => write!(f, "Unknown peer: {}", node_id),
            MeridianError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MeridianError::Api(msg) => write!(f, "API error: {}", msg),
            MeridianError::Io(err) => write!(f, "I/O error: {}", err),
            MeridianError::Transport(msg) => write!(f, "Transport error: {}", msg),
            MeridianError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
            SerializationError::BinaryEncode(err) => write!(f, "Binary encode: {}", err),
            SerializationError::BinaryDecode(err) => write!(f, "Binary decode: {}", err),
        }
    }
}

impl std::error::Error for MeridianError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MeridianError::Io(err) => Some(err),
            MeridianError::Serialization(err) => err.source(),
            _ => None,
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(err) => Some(err),
            SerializationError::BinaryEncode(err) => Some(err),
            SerializationError::BinaryDecode(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, MeridianError>;

impl IntoResponse for MeridianError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl MeridianError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            MeridianError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MeridianError::StalePeerUpdate { .. } => StatusCode::CONFLICT,
            MeridianError::SchemaMismatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MeridianError::ResolutionFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MeridianError::DirectorySnapshotUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MeridianError::UnknownPeer(_) => StatusCode::NOT_FOUND,
            MeridianError::Config(_) => StatusCode::BAD_REQUEST,
            MeridianError::Api(_) => StatusCode::BAD_REQUEST,
            MeridianError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MeridianError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MeridianError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            MeridianError::PayloadTooLarge { .. } => "payload_too_large",
            MeridianError::StalePeerUpdate { .. } => "stale_peer_update",
            MeridianError::SchemaMismatch(_) => "schema_mismatch",
            MeridianError::ResolutionFailure { .. } => "resolution_failure",
            MeridianError::DirectorySnapshotUnavailable(_) => "directory_snapshot_unavailable",
            MeridianError::UnknownPeer(_) => "unknown_peer",
            MeridianError::Config(_) => "configuration_error",
            MeridianError::Api(_) => "api_error",
            MeridianError::Io(_) => "io_error",
            MeridianError::Transport(_) => "transport_error",
            MeridianError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may simply retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeridianError::DirectorySnapshotUnavailable(_) | MeridianError::Transport(_)
        )
    }
}

// Conversions from common error types
impl From<std::io::Error> for MeridianError {
    fn from(err: std::io::Error) -> Self {
        MeridianError::Io(err)
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(err: serde_json::Error) -> Self {
        MeridianError::Serialization(SerializationError::Json(err))
    }
}

impl From<bincode::error::EncodeError> for MeridianError {
    fn from(err: bincode::error::EncodeError) -> Self {
        MeridianError::Serialization(SerializationError::BinaryEncode(err))
    }
}

impl From<bincode::error::DecodeError> for MeridianError {
    fn from(err: bincode::error::DecodeError) -> Self {
        MeridianError::Serialization(SerializationError::BinaryDecode(err))
    }
}

impl From<SerializationError> for MeridianError {
    fn from(err: SerializationError) -> Self {
        MeridianError::Serialization(err)
    }
}

impl From<reqwest::Error> for MeridianError {
    fn from(err: reqwest::Error) -> Self {
        MeridianError::Api(err.to_string())
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::MeridianError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MeridianError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! api_error {
    ($msg:expr) => {
        $crate::error::MeridianError::Api($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MeridianError::Api(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::MeridianError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MeridianError::Transport(format!($fmt, $($arg)*))
    };
}
