//! Messages and their JSON wire frames.
//!
//! Every text frame on the socket is
//! `{"type": string, "payload": any, "timestamp"?: number}` where the
//! timestamp is milliseconds since the Unix epoch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};

use crate::errors::FrameError;
use crate::topic::Topic;

/// Kind of the heartbeat frame this client emits.
pub const PING_KIND: &str = "ping";
/// Kind of the heartbeat acknowledgement sent by the server.
pub const PONG_KIND: &str = "pong";

/// An immutable message, outbound or inbound.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    kind: String,
    payload: Value,
    sent_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build an outbound message stamped with the current time.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            sent_at: Some(Utc::now()),
        }
    }

    /// Build the heartbeat ping: `{"type":"ping","payload":{"timestamp":<ms>}}`.
    pub fn heartbeat() -> Self {
        Self {
            kind: PING_KIND.to_string(),
            payload: json!({ "timestamp": nano_core::clock::now_ms() }),
            sent_at: None,
        }
    }

    /// The topic kind string.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The opaque payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// When the sender stamped the message, if it did.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    /// The subscription topic this message routes to.
    pub fn topic(&self) -> Topic {
        Topic::parse(&self.kind)
    }

    /// Whether this is a heartbeat acknowledgement.
    pub fn is_pong(&self) -> bool {
        self.kind == PONG_KIND
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let frame = Frame {
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            timestamp: self.sent_at.map(|t| Number::from(t.timestamp_millis())),
        };
        serde_json::to_string(&frame)
    }

    /// Parse an inbound text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let frame: Frame = serde_json::from_str(text)?;
        if frame.kind.is_empty() {
            return Err(FrameError::EmptyType);
        }
        #[allow(clippy::cast_possible_truncation)]
        let sent_at = frame
            .timestamp
            .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
            .and_then(nano_core::clock::from_millis);
        Ok(Self {
            kind: frame.kind,
            payload: frame.payload,
            sent_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<Number>,
}
