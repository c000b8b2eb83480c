//! Error types for the connection manager

use thiserror::Error;

use super::types::ServiceId;

/// Result type for station process operations
pub type StationResult<T> = Result<T, StationError>;

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures reported by the station process for an outbound call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    #[error("interface is not connected")]
    NotConnected,

    #[error("unknown network entry: {0}")]
    UnknownNetwork(String),

    #[error("station process unavailable: {0}")]
    Unavailable(String),

    #[error("station process rejected the call: {0}")]
    Rejected(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Errors surfaced by the connection controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("station call failed: {0}")]
    RpcFailure(#[from] StationError),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("stale callback: {0}")]
    StaleCallback(String),

    #[error("unknown service: {0}")]
    UnknownService(ServiceId),

    #[error("device is gone")]
    DeviceGone,
}

/// Errors related to transport layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
