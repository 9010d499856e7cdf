//! Connection manager behaviour driven through the in-memory transport.
//!
//! Every test runs on paused time, so reconnect delays and heartbeat
//! intervals elapse instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::Level;

use nano_realtime::test_utils::{MockConnector, MockOutcome};
use nano_realtime::{
    ConnectError, ConnectionManager, ConnectionState, LifecycleEvent, Message,
};
use nano_settings::RealtimeSettings;

fn settings() -> RealtimeSettings {
    RealtimeSettings {
        reconnect_interval_ms: 1000,
        max_reconnect_attempts: 10,
        heartbeat_interval_ms: 600_000,
        ..RealtimeSettings::with_url("ws://mock/ws")
    }
}

fn manager_with(settings: RealtimeSettings) -> (ConnectionManager, MockConnector) {
    let mock = MockConnector::new();
    let manager = ConnectionManager::new(settings, mock.clone());
    (manager, mock)
}

/// Let the event loop drain everything that is ready.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn next_scheduled(rx: &mut broadcast::Receiver<LifecycleEvent>) -> (u32, Duration) {
    loop {
        if let LifecycleEvent::ReconnectScheduled { attempt, delay } = rx.recv().await.unwrap() {
            return (attempt, delay);
        }
    }
}

async fn wait_for(rx: &mut broadcast::Receiver<LifecycleEvent>, wanted: fn(&LifecycleEvent) -> bool) -> LifecycleEvent {
    loop {
        let event = rx.recv().await.unwrap();
        if wanted(&event) {
            return event;
        }
    }
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&Message) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |m: &Message| sink.lock().push(m.kind().to_string()))
}

// ── Outbound queue ──

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_in_order_before_later_sends() {
    let (manager, mock) = manager_with(settings());
    for kind in ["a", "b", "c"] {
        manager.send(kind, json!({}));
    }
    settle().await;
    assert_eq!(manager.queued_messages(), 3);
    assert!(mock.sent_frames().is_empty());

    manager.connect().await.unwrap();
    manager.send("d", json!({}));
    manager.dispose().await;

    assert_eq!(mock.sent_non_ping_kinds(), vec!["a", "b", "c", "d"]);
    assert_eq!(manager.queued_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_keeps_only_most_recent_messages() {
    let (manager, mock) = manager_with(RealtimeSettings {
        message_queue_size: 3,
        ..settings()
    });
    for i in 0..5 {
        manager.send(format!("m{i}"), Value::Null);
    }
    settle().await;
    assert_eq!(manager.queued_messages(), 3);

    manager.connect().await.unwrap();
    manager.dispose().await;
    assert_eq!(mock.sent_non_ping_kinds(), vec!["m2", "m3", "m4"]);
}

#[tokio::test(start_paused = true)]
async fn failed_send_is_requeued_and_delivered_after_reconnect() {
    let (manager, mock) = manager_with(settings());
    let mut events = manager.lifecycle_events();
    manager.connect().await.unwrap();
    let _ = wait_for(&mut events, |e| matches!(e, LifecycleEvent::Connected)).await;

    mock.set_fail_sends(true);
    manager.send("render", json!({"id": 1}));
    let (attempt, _) = next_scheduled(&mut events).await;
    assert_eq!(attempt, 1);
    assert_eq!(manager.queued_messages(), 1);
    assert!(!manager.is_connected());

    mock.set_fail_sends(false);
    let _ = wait_for(&mut events, |e| matches!(e, LifecycleEvent::Connected)).await;
    manager.dispose().await;
    assert_eq!(mock.sent_non_ping_kinds(), vec!["render"]);
}

#[tokio::test(start_paused = true)]
async fn interrupted_flush_keeps_remaining_messages_queued() {
    let (manager, mock) = manager_with(settings());
    let mut events = manager.lifecycle_events();
    for kind in ["a", "b", "c"] {
        manager.send(kind, json!({}));
    }
    mock.set_fail_sends(true);

    manager.connect().await.unwrap();
    let (attempt, _) = next_scheduled(&mut events).await;
    assert_eq!(attempt, 1);
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(manager.queued_messages(), 3);
    assert!(mock.sent_frames().is_empty());

    mock.set_fail_sends(false);
    assert!(manager.wait_for_state(ConnectionState::Open).await);
    manager.dispose().await;
    assert_eq!(mock.sent_non_ping_kinds(), vec!["a", "b", "c"]);
    assert_eq!(manager.queued_messages(), 0);
}

// ── Reconnection ──

#[tokio::test(start_paused = true)]
async fn backoff_grows_and_resets_after_open() {
    let (manager, mock) = manager_with(settings());
    let mut events = manager.lifecycle_events();
    manager.connect().await.unwrap();

    mock.fail_next(2);
    assert!(mock.drop_abnormally());

    let mut delays = Vec::new();
    for _ in 0..3 {
        delays.push(next_scheduled(&mut events).await);
    }
    assert_eq!(
        delays,
        vec![
            (1, Duration::from_millis(1000)),
            (2, Duration::from_millis(1500)),
            (3, Duration::from_millis(2250)),
        ]
    );

    let _ = wait_for(&mut events, |e| matches!(e, LifecycleEvent::Connected)).await;
    assert_eq!(manager.reconnect_attempts(), 0);

    assert!(mock.drop_abnormally());
    assert_eq!(
        next_scheduled(&mut events).await,
        (1, Duration::from_millis(1000))
    );
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_for_the_scheduled_delay() {
    let (manager, mock) = manager_with(settings());
    manager.connect().await.unwrap();
    assert!(mock.drop_abnormally());

    tokio::time::sleep(Duration::from_millis(990)).await;
    assert_eq!(mock.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Closed);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mock.attempts(), 2);
    assert!(manager.is_connected());
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_at_attempt_ceiling_until_connect() {
    let (manager, mock) = manager_with(RealtimeSettings {
        max_reconnect_attempts: 3,
        ..settings()
    });
    let mut events = manager.lifecycle_events();
    manager.connect().await.unwrap();

    mock.fail_next(3);
    assert!(mock.drop_abnormally());
    let abandoned = wait_for(&mut events, |e| {
        matches!(e, LifecycleEvent::ReconnectAbandoned { .. })
    })
    .await;
    assert_eq!(abandoned, LifecycleEvent::ReconnectAbandoned { attempts: 3 });
    assert_eq!(mock.attempts(), 4);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(mock.attempts(), 4);
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(manager.reconnect_attempts(), 3);

    manager.connect().await.unwrap();
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(mock.attempts(), 5);
    assert!(manager.is_connected());
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn ceiling_failures_are_logged() {
    let (logs, _guard) = nano_logging::capture_logs();
    let (manager, mock) = manager_with(RealtimeSettings {
        max_reconnect_attempts: 1,
        ..settings()
    });
    manager.connect().await.unwrap();
    mock.fail_next(1);
    assert!(mock.drop_abnormally());
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(logs.has_event(Level::ERROR, "max reconnect attempts reached"));
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (manager, mock) = manager_with(settings());
    let mut events = manager.lifecycle_events();
    manager.connect().await.unwrap();

    assert!(mock.drop_abnormally());
    let _ = next_scheduled(&mut events).await;
    manager.disconnect();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(mock.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Closed);

    manager.connect().await.unwrap();
    assert_eq!(mock.attempts(), 2);
    assert_eq!(manager.reconnect_attempts(), 0);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn connect_during_backoff_skips_the_wait() {
    let (manager, mock) = manager_with(RealtimeSettings {
        reconnect_interval_ms: 60_000,
        ..settings()
    });
    let mut events = manager.lifecycle_events();
    manager.connect().await.unwrap();
    assert!(mock.drop_abnormally());
    let _ = next_scheduled(&mut events).await;
    assert_eq!(manager.reconnect_attempts(), 1);

    manager.connect().await.unwrap();
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(mock.attempts(), 2);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(mock.attempts(), 2);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn peer_close_reconnects_but_disconnect_does_not() {
    let (manager, mock) = manager_with(settings());
    let mut events = manager.lifecycle_events();
    manager.connect().await.unwrap();

    assert!(mock.drop_connection(1000, "server restart"));
    let closed = wait_for(&mut events, |e| matches!(e, LifecycleEvent::Disconnected { .. })).await;
    assert_matches!(
        closed,
        LifecycleEvent::Disconnected { code: 1000, intentional: false, .. }
    );
    let _ = wait_for(&mut events, |e| matches!(e, LifecycleEvent::Connected)).await;
    assert_eq!(mock.attempts(), 2);

    manager.disconnect();
    let closed = wait_for(&mut events, |e| matches!(e, LifecycleEvent::Disconnected { .. })).await;
    assert_matches!(
        closed,
        LifecycleEvent::Disconnected { code: 1000, intentional: true, .. }
    );
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(mock.attempts(), 2);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_disabled_stays_closed() {
    let (manager, mock) = manager_with(RealtimeSettings {
        reconnect: false,
        ..settings()
    });
    manager.connect().await.unwrap();
    assert!(mock.drop_abnormally());
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(mock.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Closed);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_in_flight_connect() {
    let (manager, mock) = manager_with(settings());
    mock.push_outcome(MockOutcome::Hang);

    let pending = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect().await }
    });
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    manager.disconnect();
    assert_matches!(pending.await.unwrap(), Err(ConnectError::Cancelled));
    assert_eq!(manager.state(), ConnectionState::Closed);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn failed_connect_still_reconnects_in_background() {
    let (manager, mock) = manager_with(settings());
    mock.fail_next(1);
    assert_matches!(manager.connect().await, Err(ConnectError::Transport(_)));
    assert!(manager.wait_for_state(ConnectionState::Open).await);
    assert_eq!(mock.attempts(), 2);
    manager.dispose().await;
}

// ── Inbound dispatch ──

#[tokio::test(start_paused = true)]
async fn exact_subscribers_then_wildcard() {
    let (manager, mock) = manager_with(settings());
    let order = Arc::new(Mutex::new(Vec::new()));
    let wildcard_order = Arc::clone(&order);
    let exact_order = Arc::clone(&order);
    let _all = manager.subscribe("*", move |m: &Message| {
        wildcard_order.lock().push(format!("*:{}", m.kind()));
    });
    let _exact = manager.subscribe("canon.updated", move |m: &Message| {
        exact_order.lock().push(format!("exact:{}", m.kind()));
    });
    manager.connect().await.unwrap();

    assert!(mock.deliver("canon.updated", json!({"palette": ["#000"]})));
    assert!(mock.deliver("render.done", json!({})));
    settle().await;

    assert_eq!(
        *order.lock(),
        vec!["exact:canon.updated", "*:canon.updated", "*:render.done"]
    );
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_twice_is_a_no_op() {
    let (manager, mock) = manager_with(settings());
    let (seen, callback) = recorder();
    let sub = manager.subscribe("render.done", callback);
    let (other_seen, other_callback) = recorder();
    let _other = manager.subscribe("render.done", other_callback);
    manager.connect().await.unwrap();

    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());

    assert!(mock.deliver("render.done", Value::Null));
    settle().await;
    assert!(seen.lock().is_empty());
    assert_eq!(other_seen.lock().len(), 1);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_subscriber_is_isolated() {
    let (logs, _guard) = nano_logging::capture_logs();
    let (manager, mock) = manager_with(settings());
    let _bad = manager.subscribe("job:7", |_: &Message| panic!("subscriber bug"));
    let (seen, callback) = recorder();
    let _good = manager.subscribe("job:7", callback);
    manager.connect().await.unwrap();

    assert!(mock.deliver("job:7", json!({"progress": 10})));
    assert!(mock.deliver("job:7", json!({"progress": 20})));
    settle().await;

    assert_eq!(seen.lock().len(), 2);
    assert!(manager.is_connected());
    assert!(logs.has_event(Level::WARN, "subscriber callback panicked"));
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_logged_and_dropped() {
    let (logs, _guard) = nano_logging::capture_logs();
    let (manager, mock) = manager_with(settings());
    let (seen, callback) = recorder();
    let _all = manager.subscribe("*", callback);
    manager.connect().await.unwrap();

    assert!(mock.deliver_text("not json"));
    assert!(mock.deliver_text(r#"{"payload": 1}"#));
    assert!(mock.deliver("ok", Value::Null));
    settle().await;

    assert_eq!(*seen.lock(), vec!["ok"]);
    assert_eq!(
        logs.events()
            .iter()
            .filter(|e| e.message.contains("dropping malformed frame"))
            .count(),
        2
    );
    assert!(manager.is_connected());
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn pong_is_not_dispatched() {
    let (manager, mock) = manager_with(settings());
    let (seen, callback) = recorder();
    let _all = manager.subscribe("*", callback);
    let (pong_seen, pong_callback) = recorder();
    let _pong = manager.subscribe("pong", pong_callback);
    manager.connect().await.unwrap();

    assert!(mock.deliver("pong", Value::Null));
    assert!(mock.deliver("job:1", Value::Null));
    settle().await;

    assert_eq!(*seen.lock(), vec!["job:1"]);
    assert!(pong_seen.lock().is_empty());
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn subscribers_can_send_from_callbacks() {
    let (manager, mock) = manager_with(settings());
    let replier = manager.clone();
    let _sub = manager.subscribe("job:9", move |_: &Message| {
        replier.send("ack", json!({"jobId": "9"}));
    });
    manager.connect().await.unwrap();
    assert!(mock.deliver("job:9", Value::Null));
    settle().await;
    manager.dispose().await;
    assert_eq!(mock.sent_non_ping_kinds(), vec!["ack"]);
}

// ── Heartbeat ──

#[tokio::test(start_paused = true)]
async fn heartbeat_sends_one_ping_per_interval_while_open() {
    let (manager, mock) = manager_with(RealtimeSettings {
        heartbeat_interval_ms: 1000,
        ..settings()
    });
    mock.push_outcome(MockOutcome::AcceptAfter(Duration::from_millis(2500)));

    manager.connect().await.unwrap();
    assert!(mock.sent_kinds().is_empty());

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(mock.sent_kinds(), vec!["ping", "ping", "ping"]);

    let frame: Value = serde_json::from_str(&mock.sent_frames()[0]).unwrap();
    assert!(frame["payload"]["timestamp"].is_i64());
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_stops_after_disconnect() {
    let (manager, mock) = manager_with(RealtimeSettings {
        heartbeat_interval_ms: 1000,
        ..settings()
    });
    manager.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    manager.disconnect();
    assert!(manager.wait_for_state(ConnectionState::Closed).await);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.sent_kinds(), vec!["ping"]);
    manager.dispose().await;
}

// ── Lifecycle ──

#[tokio::test(start_paused = true)]
async fn dispose_stops_everything() {
    let (manager, mock) = manager_with(settings());
    manager.connect().await.unwrap();
    manager.dispose().await;

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(mock.closes(), vec![(1000, "normal closure".to_string())]);
    assert_matches!(manager.connect().await, Err(ConnectError::Shutdown));
    assert!(!manager.wait_for_state(ConnectionState::Open).await);
}
