//! Topic subscription table and unsubscribe handles.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::message::Message;
use crate::topic::Topic;

/// A subscriber callback.
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Unique registration identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

struct Entry {
    id: SubscriptionId,
    callback: Callback,
    active: AtomicBool,
}

/// Mapping from topic to registered callbacks.
///
/// Dispatch snapshots the matching entries and releases the lock before
/// invoking anything, so callbacks may subscribe or unsubscribe freely.
/// Each entry's `active` flag is re-checked right before its invocation.
#[derive(Default)]
pub struct SubscriptionTable {
    topics: Mutex<HashMap<Topic, Vec<Arc<Entry>>>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `topic` and return its handle.
    pub fn subscribe(self: &Arc<Self>, topic: Topic, callback: Callback) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let entry = Arc::new(Entry {
            id,
            callback,
            active: AtomicBool::new(true),
        });
        self.topics
            .lock()
            .entry(topic.clone())
            .or_default()
            .push(Arc::clone(&entry));
        trace!(%topic, subscription = %id, "subscribed");
        Subscription {
            topic,
            entry,
            table: Arc::downgrade(self),
        }
    }

    fn remove(&self, topic: &Topic, id: SubscriptionId) {
        let mut topics = self.topics.lock();
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                let _ = topics.remove(topic);
            }
        }
    }

    /// Deliver `message` to its exact-topic subscribers, then to wildcard
    /// subscribers. Returns how many callbacks completed without panicking.
    pub fn dispatch(&self, message: &Message) -> usize {
        let topic = message.topic();
        let targets: Vec<Arc<Entry>> = {
            let topics = self.topics.lock();
            let exact = topics.get(&topic).into_iter().flatten();
            let wildcard = if topic.is_wildcard() {
                None
            } else {
                topics.get(&Topic::All)
            };
            exact.chain(wildcard.into_iter().flatten()).cloned().collect()
        };

        let mut delivered = 0;
        for entry in targets {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(message))) {
                Ok(()) => delivered += 1,
                Err(panic) => warn!(
                    subscription = %entry.id,
                    kind = message.kind(),
                    error = panic_message(panic.as_ref()),
                    "subscriber callback panicked"
                ),
            }
        }
        delivered
    }

    /// Number of live registrations for `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    /// Total live registrations.
    pub fn len(&self) -> usize {
        self.topics.lock().values().map(Vec::len).sum()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    topic: Topic,
    entry: Arc<Entry>,
    table: Weak<SubscriptionTable>,
}

impl Subscription {
    /// Remove exactly this registration.
    ///
    /// Idempotent: returns `true` only for the call that removed it. Any
    /// dispatch that starts after this returns skips the callback, including
    /// the rest of the dispatch this is called from. A dispatch already
    /// running on another thread may still make one final call. May be
    /// called from inside the callback itself.
    pub fn unsubscribe(&self) -> bool {
        if !self.entry.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(table) = self.table.upgrade() {
            table.remove(&self.topic, self.entry.id);
        }
        trace!(topic = %self.topic, subscription = %self.entry.id, "unsubscribed");
        true
    }

    /// Registration identifier.
    pub fn id(&self) -> SubscriptionId {
        self.entry.id
    }

    /// Topic this handle is registered under.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Whether the registration is still live.
    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}
