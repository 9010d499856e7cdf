//! Scriptable in-memory transport for tests.
//!
//! [`MockConnector`] is a cloneable handle: hand one clone to the
//! [`ConnectionManager`](crate::ConnectionManager) and keep another to
//! script connect outcomes, push inbound frames, drop the live connection
//! and inspect what was written.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::transport::{ABNORMAL_CLOSURE, Connector, TransportConnection, TransportEvent};

/// What the next `connect` call does.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    /// Open immediately.
    Accept,
    /// Open after the given delay.
    AcceptAfter(Duration),
    /// Fail with [`TransportError::Connect`].
    Fail(String),
    /// Never resolve.
    Hang,
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<MockOutcome>>,
    attempts: AtomicUsize,
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<(u16, String)>>,
    live: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    fail_sends: AtomicBool,
}

/// In-memory [`Connector`]. Accepts every attempt unless scripted otherwise.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Create a connector that accepts every attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for a future attempt. Unscripted attempts accept.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.state.script.lock().push_back(outcome);
    }

    /// Make the next `n` attempts fail.
    pub fn fail_next(&self, n: usize) {
        let mut script = self.state.script.lock();
        for i in 0..n {
            script.push_back(MockOutcome::Fail(format!("scripted failure {}", i + 1)));
        }
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Whether a connection is currently live.
    pub fn is_live(&self) -> bool {
        self.state.live.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Push an inbound text frame to the live connection.
    pub fn deliver_text(&self, text: &str) -> bool {
        self.emit(TransportEvent::Text(text.to_owned()))
    }

    /// Push an inbound `{"type","payload"}` frame.
    pub fn deliver(&self, kind: &str, payload: Value) -> bool {
        let frame = serde_json::json!({ "type": kind, "payload": payload });
        self.deliver_text(&frame.to_string())
    }

    /// Close the live connection from the peer side.
    pub fn drop_connection(&self, code: u16, reason: &str) -> bool {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.to_owned(),
        })
    }

    /// Drop the live connection without a close frame.
    pub fn drop_abnormally(&self) -> bool {
        self.drop_connection(ABNORMAL_CLOSURE, "")
    }

    /// Make every subsequent `send_text` fail, or succeed again.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Every frame written, across all connections, in order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.state.sent.lock().clone()
    }

    /// The `type` of every frame written.
    pub fn sent_kinds(&self) -> Vec<String> {
        self.state
            .sent
            .lock()
            .iter()
            .filter_map(|f| serde_json::from_str::<Value>(f).ok())
            .filter_map(|v| v["type"].as_str().map(str::to_owned))
            .collect()
    }

    /// Sent kinds other than heartbeat pings.
    pub fn sent_non_ping_kinds(&self) -> Vec<String> {
        self.sent_kinds()
            .into_iter()
            .filter(|k| k != crate::message::PING_KIND)
            .collect()
    }

    /// Forget recorded frames.
    pub fn clear_sent(&self) {
        self.state.sent.lock().clear();
    }

    /// Close codes and reasons the manager sent, in order.
    pub fn closes(&self) -> Vec<(u16, String)> {
        self.state.closes.lock().clone()
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.state
            .live
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        let _ = self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .state
            .script
            .lock()
            .pop_front()
            .unwrap_or(MockOutcome::Accept);
        match outcome {
            MockOutcome::Accept => {}
            MockOutcome::AcceptAfter(delay) => tokio::time::sleep(delay).await,
            MockOutcome::Fail(reason) => return Err(TransportError::Connect(reason)),
            MockOutcome::Hang => std::future::pending::<()>().await,
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.live.lock() = Some(tx);
        Ok(Box::new(MockConnection {
            events: rx,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    state: Arc<MockState>,
}

#[async_trait]
impl TransportConnection for MockConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("scripted send failure".into()));
        }
        self.state.sent.lock().push(text);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.events.recv().await {
            Some(event) => {
                if !matches!(event, TransportEvent::Text(_)) {
                    self.events.close();
                }
                event
            }
            None => TransportEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            },
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        self.events.close();
        self.state.closes.lock().push((code, reason.to_owned()));
    }
}
