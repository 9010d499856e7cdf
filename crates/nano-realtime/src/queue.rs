//! Bounded outbound queue.

use std::collections::VecDeque;

use tracing::debug;

use crate::message::Message;

/// FIFO buffer of messages sent while the connection is not open.
///
/// Never holds more than `capacity` messages; appending to a full queue
/// evicts the oldest entry first.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<Message>,
    capacity: usize,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a message, evicting the oldest if full.
    ///
    /// Returns the evicted message, if any. With capacity zero the message
    /// itself is returned.
    pub fn push(&mut self, message: Message) -> Option<Message> {
        if self.capacity == 0 {
            return Some(message);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        if let Some(ref old) = evicted {
            debug!(kind = old.kind(), capacity = self.capacity, "outbound queue full, evicting oldest");
        }
        self.items.push_back(message);
        evicted
    }

    /// Put a message back at the head after a failed flush.
    ///
    /// Only called with messages that were just popped, so the bound holds.
    pub fn push_front(&mut self, message: Message) {
        if self.items.len() < self.capacity {
            self.items.push_front(message);
        }
    }

    /// Remove the oldest message.
    pub fn pop(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Kinds in queue order.
    pub fn kinds(&self) -> Vec<String> {
        self.items.iter().map(|m| m.kind().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    fn msg(kind: &str) -> Message {
        Message::new(kind, Value::Null)
    }

    #[test]
    fn fifo_order() {
        let mut q = OutboundQueue::new(4);
        for k in ["a", "b", "c"] {
            assert!(q.push(msg(k)).is_none());
        }
        assert_eq!(q.pop().unwrap().kind(), "a");
        assert_eq!(q.pop().unwrap().kind(), "b");
        assert_eq!(q.pop().unwrap().kind(), "c");
        assert!(q.pop().is_none());
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let mut q = OutboundQueue::new(2);
        let _ = q.push(msg("a"));
        let _ = q.push(msg("b"));
        let evicted = q.push(msg("c")).unwrap();
        assert_eq!(evicted.kind(), "a");
        assert_eq!(q.kinds(), vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut q = OutboundQueue::new(0);
        let returned = q.push(msg("a")).unwrap();
        assert_eq!(returned.kind(), "a");
        assert!(q.is_empty());
        q.push_front(msg("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn push_front_restores_head() {
        let mut q = OutboundQueue::new(3);
        let _ = q.push(msg("a"));
        let _ = q.push(msg("b"));
        let head = q.pop().unwrap();
        q.push_front(head);
        assert_eq!(q.kinds(), vec!["a", "b"]);
    }

    proptest! {
        #[test]
        fn retains_most_recent_capacity(capacity in 1usize..32, extra in 0usize..64) {
            let mut q = OutboundQueue::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                let _ = q.push(msg(&i.to_string()));
                prop_assert!(q.len() <= capacity);
            }
            let expected: Vec<String> = (extra..total).map(|i| i.to_string()).collect();
            prop_assert_eq!(q.kinds(), expected);
        }
    }
}
