//! Transport seam between the connection manager and the network.
//!
//! The manager only sees text frames and close notifications. A
//! [`Connector`] produces a fresh [`TransportConnection`] per attempt;
//! connections are never reused across reconnects.

pub mod websocket;

use async_trait::async_trait;

use crate::errors::TransportError;

pub use websocket::{WsConnection, WsConnector};

/// Close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame carried no status code.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// What a connection reports from its read side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Text(String),
    /// The peer closed, or the stream ended.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The read side failed. The connection is unusable afterwards.
    Error(TransportError),
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connection to `url`. Resolving `Ok` means Open.
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// One established connection, owned by the manager's event loop.
#[async_trait]
pub trait TransportConnection: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: the event loop drops this future whenever
    /// another branch wins.
    async fn next_event(&mut self) -> TransportEvent;

    /// Send a close frame and release the connection.
    async fn close(&mut self, code: u16, reason: &str);
}
