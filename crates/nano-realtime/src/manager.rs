//! The connection manager: one logical connection with reconnect, heartbeat,
//! an outbound queue and topic dispatch.
//!
//! [`ConnectionManager`] is a cheap cloneable handle. All connection state
//! lives in a single event-loop task that owns the transport, the queue,
//! the heartbeat interval and the reconnect timer. Handle methods talk to
//! it over an unbounded command channel, so `send`, `disconnect` and
//! `subscribe` never block.
//!
//! The loop is `biased` toward commands: a `disconnect()` issued before a
//! reconnect timer or heartbeat tick is observed always wins.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use nano_core::ids::ConnectionId;
use nano_settings::RealtimeSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::backoff::ReconnectPolicy;
use crate::errors::{ConnectError, TransportError};
use crate::message::Message;
use crate::queue::OutboundQueue;
use crate::state::{ConnectionState, LifecycleEvent};
use crate::subscriptions::{Subscription, SubscriptionTable};
use crate::topic::Topic;
use crate::transport::{
    ABNORMAL_CLOSURE, Connector, NORMAL_CLOSURE, TransportConnection, TransportEvent, WsConnector,
};

/// Lifecycle events buffered per receiver before it starts lagging.
const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Shortest heartbeat period; `tokio::time::interval` rejects zero.
const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_millis(1);

/// Reason sent with the close frame on `disconnect()`.
const NORMAL_CLOSE_REASON: &str = "normal closure";

type ConnectReply = oneshot::Sender<Result<(), ConnectError>>;
type PendingConnect = BoxFuture<'static, Result<Box<dyn TransportConnection>, TransportError>>;

enum Command {
    Connect(ConnectReply),
    Disconnect,
    Send(Message),
    Shutdown,
}

struct Shared {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    subscriptions: Arc<SubscriptionTable>,
    attempts: Arc<AtomicU32>,
    queued: Arc<AtomicUsize>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a realtime connection.
///
/// Construct one at application start, pass clones to whoever needs it, and
/// call [`dispose`](Self::dispose) at shutdown. Dropping every clone also
/// stops the event loop.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Shared>,
}

impl ConnectionManager {
    /// Spawn the event loop using `connector` for every connection attempt.
    ///
    /// Must be called inside a tokio runtime. No connection is opened until
    /// [`connect`](Self::connect) is called.
    pub fn new(settings: RealtimeSettings, connector: impl Connector) -> Self {
        let id = ConnectionId::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let subscriptions = Arc::new(SubscriptionTable::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let queued = Arc::new(AtomicUsize::new(0));

        let span = info_span!("realtime", connection = %id, url = %settings.url);
        let heartbeat_period = settings.heartbeat_interval().max(MIN_HEARTBEAT_PERIOD);
        if heartbeat_period != settings.heartbeat_interval() {
            warn!(connection = %id, "heartbeat interval of 0ms raised to 1ms");
        }
        let event_loop = EventLoop {
            reconnect: settings.reconnect,
            heartbeat_period,
            policy: ReconnectPolicy::from_settings(&settings),
            connector: Arc::new(connector),
            commands: commands_rx,
            state: state_tx,
            lifecycle: lifecycle.clone(),
            subscriptions: Arc::clone(&subscriptions),
            queue: OutboundQueue::new(settings.message_queue_size),
            queued_gauge: Arc::clone(&queued),
            attempts_gauge: Arc::clone(&attempts),
            url: settings.url,
            attempts: 0,
            intentional: false,
            connection: None,
            connecting: None,
            waiters: Vec::new(),
            heartbeat: None,
            reconnect_timer: None,
        };
        let task = tokio::spawn(event_loop.run().instrument(span));

        Self {
            inner: Arc::new(Shared {
                id,
                commands: commands_tx,
                state: state_rx,
                lifecycle,
                subscriptions,
                attempts,
                queued,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Manager over the real WebSocket transport.
    pub fn websocket(settings: RealtimeSettings) -> Self {
        Self::new(settings, WsConnector)
    }

    /// Open the connection.
    ///
    /// Resolves immediately if already open and joins an attempt already in
    /// flight. Otherwise cancels any pending reconnect timer, resets the
    /// attempt counter and opens a new connection. A failed attempt still
    /// schedules automatic reconnection when enabled.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Connect(reply))
            .map_err(|_| ConnectError::Shutdown)?;
        rx.await.unwrap_or(Err(ConnectError::Shutdown))
    }

    /// Close the connection and stop all automatic reconnection until the
    /// next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        if self.inner.commands.send(Command::Disconnect).is_err() {
            debug!(connection = %self.inner.id, "disconnect after shutdown ignored");
        }
    }

    /// Send a message now if open, otherwise queue it.
    pub fn send(&self, kind: impl Into<String>, payload: Value) {
        let message = Message::new(kind, payload);
        if let Err(mpsc::error::SendError(Command::Send(message))) =
            self.inner.commands.send(Command::Send(message))
        {
            debug!(connection = %self.inner.id, kind = message.kind(), "send after shutdown dropped");
        }
    }

    /// Register `callback` for `topic`. `"*"` receives every message.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner
            .subscriptions
            .subscribe(topic.into(), Arc::new(callback))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Reconnect attempts made since the last open or explicit connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Messages waiting for the connection to open.
    pub fn queued_messages(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    /// Identifier used in this manager's log records.
    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    /// Receive lifecycle events from now on.
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Wait until the state equals `target`. Returns `false` if the event
    /// loop has stopped first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> bool {
        let mut rx = self.inner.state.clone();
        rx.wait_for(|state| *state == target).await.is_ok()
    }

    /// Disconnect and stop the event loop. Pending `connect()` calls fail with
    /// [`ConnectError::Shutdown`]. Safe to call more than once.
    pub async fn dispose(&self) {
        let _ = self.inner.commands.send(Command::Shutdown);
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(connection = %self.inner.id, error = %e, "event loop ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event loop
// ─────────────────────────────────────────────────────────────────────────────

struct EventLoop {
    url: String,
    reconnect: bool,
    heartbeat_period: Duration,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    subscriptions: Arc<SubscriptionTable>,
    queue: OutboundQueue,
    queued_gauge: Arc<AtomicUsize>,
    attempts_gauge: Arc<AtomicU32>,
    attempts: u32,
    intentional: bool,
    connection: Option<Box<dyn TransportConnection>>,
    connecting: Option<PendingConnect>,
    waiters: Vec<ConnectReply>,
    heartbeat: Option<Interval>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl EventLoop {
    async fn run(mut self) {
        debug!("event loop started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                result = poll_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                event = poll_event(&mut self.connection) => self.on_transport_event(event).await,
                () = poll_sleep(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.start_attempt();
                }
                () = poll_tick(&mut self.heartbeat) => self.send_heartbeat().await,
            }
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ConnectError::Shutdown));
        }
        self.close_intentionally().await;
        debug!("event loop stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.on_connect_requested(reply),
            Command::Disconnect => self.close_intentionally().await,
            Command::Send(message) => self.on_send(message).await,
            Command::Shutdown => {}
        }
    }

    fn on_connect_requested(&mut self, reply: ConnectReply) {
        if self.connection.is_some() {
            let _ = reply.send(Ok(()));
            return;
        }
        self.waiters.push(reply);
        if self.connecting.is_some() {
            trace!("joining in-flight connect");
            return;
        }
        self.reconnect_timer = None;
        self.intentional = false;
        self.set_attempts(0);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        info!(attempt = self.attempts, "connecting");
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    async fn on_connect_result(&mut self, result: Result<Box<dyn TransportConnection>, TransportError>) {
        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.set_attempts(0);
                self.set_state(ConnectionState::Open);
                self.start_heartbeat();
                info!("connected");
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.emit(LifecycleEvent::Connected);
                self.flush_queue().await;
            }
            Err(e) => {
                warn!(error = %e, attempt = self.attempts, "connect failed");
                self.set_state(ConnectionState::Closed);
                self.emit(LifecycleEvent::ConnectFailed {
                    error: e.to_string(),
                });
                if self.reconnect && !self.intentional {
                    self.schedule_reconnect();
                }
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(ConnectError::Transport(e.clone())));
                }
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => self.on_inbound(&text),
            TransportEvent::Closed { code, reason } => self.on_closed(code, reason),
            TransportEvent::Error(e) => {
                warn!(error = %e, "transport error");
                self.on_closed(ABNORMAL_CLOSURE, e.to_string());
            }
        }
    }

    fn on_inbound(&self, text: &str) {
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed frame");
                return;
            }
        };
        if message.is_pong() {
            trace!("heartbeat acknowledged");
            return;
        }
        let delivered = self.subscriptions.dispatch(&message);
        trace!(kind = message.kind(), delivered, "dispatched");
    }

    /// Unintended loss of the connection.
    fn on_closed(&mut self, code: u16, reason: String) {
        self.connection = None;
        self.heartbeat = None;
        self.set_state(ConnectionState::Closed);
        if code == NORMAL_CLOSURE {
            info!(code, reason = %reason, "connection closed by peer");
        } else {
            warn!(code, reason = %reason, "connection lost");
        }
        self.emit(LifecycleEvent::Disconnected {
            code,
            reason,
            intentional: false,
        });
        if self.reconnect && !self.intentional {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.policy.is_exhausted(self.attempts) {
            error!(attempts = self.attempts, "max reconnect attempts reached, giving up");
            self.emit(LifecycleEvent::ReconnectAbandoned {
                attempts: self.attempts,
            });
            return;
        }
        self.set_attempts(self.attempts + 1);
        let delay = self.policy.delay_for_attempt(self.attempts);
        info!(
            attempt = self.attempts,
            max = self.policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
        self.emit(LifecycleEvent::ReconnectScheduled {
            attempt: self.attempts,
            delay,
        });
    }

    async fn close_intentionally(&mut self) {
        self.intentional = true;
        self.reconnect_timer = None;
        self.heartbeat = None;
        let was_connecting = self.connecting.take().is_some();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ConnectError::Cancelled));
        }
        if let Some(mut connection) = self.connection.take() {
            self.set_state(ConnectionState::Closing);
            connection.close(NORMAL_CLOSURE, NORMAL_CLOSE_REASON).await;
            self.set_state(ConnectionState::Closed);
            info!("disconnected");
            self.emit(LifecycleEvent::Disconnected {
                code: NORMAL_CLOSURE,
                reason: NORMAL_CLOSE_REASON.to_string(),
                intentional: true,
            });
        } else {
            if was_connecting {
                debug!("in-flight connect cancelled");
            }
            self.set_state(ConnectionState::Closed);
        }
    }

    async fn on_send(&mut self, message: Message) {
        if self.connection.is_none() {
            self.enqueue(message);
            return;
        }
        if let Err(e) = self.write(&message).await {
            warn!(error = %e, kind = message.kind(), "send failed, queueing");
            self.enqueue(message);
            self.on_closed(ABNORMAL_CLOSURE, e.to_string());
        }
    }

    fn enqueue(&mut self, message: Message) {
        if let Some(dropped) = self.queue.push(message) {
            debug!(kind = dropped.kind(), "message dropped from outbound queue");
        }
        self.sync_queue_gauge();
    }

    /// Drain the queue in order, stopping at the first failed write.
    async fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        debug!(count = self.queue.len(), "flushing outbound queue");
        while let Some(message) = self.queue.pop() {
            if let Err(e) = self.write(&message).await {
                warn!(error = %e, remaining = self.queue.len() + 1, "flush interrupted");
                self.queue.push_front(message);
                self.sync_queue_gauge();
                self.on_closed(ABNORMAL_CLOSURE, e.to_string());
                return;
            }
        }
        self.sync_queue_gauge();
    }

    async fn write(&mut self, message: &Message) -> Result<(), TransportError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(TransportError::Closed);
        };
        let text = message
            .encode()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        connection.send_text(text).await
    }

    fn start_heartbeat(&mut self) {
        let period = self.heartbeat_period;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    async fn send_heartbeat(&mut self) {
        trace!("heartbeat ping");
        if let Err(e) = self.write(&Message::heartbeat()).await {
            warn!(error = %e, "heartbeat send failed");
            self.on_closed(ABNORMAL_CLOSURE, e.to_string());
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "state changed");
        }
    }

    fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
        self.attempts_gauge.store(attempts, Ordering::Release);
    }

    fn sync_queue_gauge(&self) {
        self.queued_gauge.store(self.queue.len(), Ordering::Release);
    }

    fn emit(&self, event: LifecycleEvent) {
        // Err only means nobody is listening.
        let _ = self.lifecycle.send(event);
    }
}

async fn poll_connect(
    pending_connect: &mut Option<PendingConnect>,
) -> Result<Box<dyn TransportConnection>, TransportError> {
    match pending_connect {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn poll_event(connection: &mut Option<Box<dyn TransportConnection>>) -> TransportEvent {
    match connection {
        Some(connection) => connection.next_event().await,
        None => pending().await,
    }
}

async fn poll_sleep(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn poll_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => pending().await,
    }
}
