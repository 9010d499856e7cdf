//! Connection state and lifecycle events.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// State of the logical connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A transport connection is being established.
    Connecting,
    /// Frames can be exchanged.
    Open,
    /// A close has been requested and is in progress.
    Closing,
    /// No connection. Initial state, re-entered after every close.
    #[default]
    Closed,
}

impl ConnectionState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notable transitions, broadcast to anyone holding
/// [`ConnectionManager::lifecycle_events`](crate::ConnectionManager::lifecycle_events).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The connection reached Open.
    Connected,
    /// The connection closed.
    Disconnected {
        /// WebSocket close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
        /// Whether the close came from `disconnect()`.
        intentional: bool,
    },
    /// A reconnect attempt was scheduled.
    ReconnectScheduled {
        /// 1-indexed attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// The attempt budget is spent; only `connect()` resumes.
    ReconnectAbandoned {
        /// Attempts made.
        attempts: u32,
    },
    /// A connection attempt failed before Open.
    ConnectFailed {
        /// Transport error text.
        error: String,
    },
}
