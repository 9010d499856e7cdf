//! Error types for the realtime connection layer.
//!
//! Only [`ConnectError`] ever reaches callers (through
//! [`ConnectionManager::connect`](crate::ConnectionManager::connect)).
//! [`TransportError`] and [`FrameError`] are produced internally and end up
//! in log records.

use thiserror::Error;

/// Failure reported by a transport implementation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// The peer violated the WebSocket protocol or sent an unusable frame.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

/// Why a `connect()` call did not reach the Open state.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The transport reported an error before the connection opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// `disconnect()` was called while the attempt was in flight.
    #[error("connect cancelled by disconnect")]
    Cancelled,
    /// The manager has been disposed.
    #[error("connection manager is shut down")]
    Shutdown,
}

/// Failure decoding an inbound text frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON, or JSON of the wrong shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` field was empty.
    #[error("frame has an empty type")]
    EmptyType,
}
