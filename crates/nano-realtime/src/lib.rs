//! # nano-realtime
//!
//! Client side of the NanoDesigner realtime channel: one logical WebSocket
//! connection that reconnects with backoff, sends heartbeat pings, queues
//! outbound messages while disconnected and routes inbound messages to
//! topic subscribers.
//!
//! - [`ConnectionManager`]: the handle applications hold
//! - [`JobSubscription`]: watch one render job's updates and failures
//! - [`transport`]: the [`Connector`] seam and the tokio-tungstenite transport
//! - [`test_utils`]: an in-memory [`Connector`] for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod jobs;
pub mod manager;
pub mod message;
pub mod queue;
pub mod state;
pub mod subscriptions;
pub mod test_utils;
pub mod topic;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use errors::{ConnectError, FrameError, TransportError};
pub use jobs::{JobEvent, JobSubscription};
pub use manager::ConnectionManager;
pub use message::Message;
pub use state::{ConnectionState, LifecycleEvent};
pub use subscriptions::{Subscription, SubscriptionId};
pub use topic::Topic;
pub use transport::{Connector, TransportConnection, TransportEvent, WsConnector};
