//! Identifier newtypes.
//!
//! A job ID comes from the design backend and is kept verbatim. A connection
//! ID is generated locally as a UUID v7 so log records sort by creation time.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identifier of a render job on the design backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of one connection manager, used in log fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh, time-ordered ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
