//! # Message Duplication Manager
//!
//! The idempotency backstop for at-least-once delivery: transports may redeliver,
//! so the dispatch process consults this manager before invoking a handler and
//! marks the identity only after successful handling. A crash between receipt and
//! success therefore results in reprocessing, never silent loss.
//!
//! Retention is a bounded, count-based FIFO window (default 10 000 identities).
//! When the window overflows, the oldest identity is evicted and a warning is
//! logged: the degradation to "may reprocess" is explicit, not silent.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tracing::warn;

const DEFAULT_WINDOW: usize = 10_000;

/// Tracks which message identities have already been processed.
///
/// Safe for concurrent use from multiple dispatch processes; all access goes
/// through one internal lock held only for the duration of a lookup or insert.
pub struct MessageDuplicationManager {
    inner: Mutex<Window>,
}

struct Window {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl MessageDuplicationManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WINDOW)
    }

    /// A manager remembering at most `capacity` identities, oldest evicted first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Window {
                seen: HashSet::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// True once `message_id` has been marked, until the record leaves the window.
    pub fn has_been_processed(&self, message_id: &str) -> bool {
        let window = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        window.seen.contains(message_id)
    }

    /// Records an identity as processed. Marking twice is harmless.
    pub fn mark_processed(&self, message_id: &str) {
        let mut window = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !window.seen.insert(message_id.to_string()) {
            return;
        }
        window.order.push_back(message_id.to_string());
        if window.order.len() > window.capacity {
            if let Some(evicted) = window.order.pop_front() {
                window.seen.remove(&evicted);
                warn!(
                    message_id = %evicted,
                    capacity = window.capacity,
                    "dedup window full, oldest identity evicted and may be reprocessed"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageDuplicationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_is_idempotent() {
        let dedup = MessageDuplicationManager::new();
        assert!(!dedup.has_been_processed("msg-1"));

        dedup.mark_processed("msg-1");
        dedup.mark_processed("msg-1");

        assert!(dedup.has_been_processed("msg-1"));
        assert_eq!(dedup.len(), 1);
        assert!(!dedup.has_been_processed("msg-2"));
    }

    #[test]
    fn window_overflow_evicts_oldest_first() {
        let dedup = MessageDuplicationManager::with_capacity(2);
        dedup.mark_processed("a");
        dedup.mark_processed("b");
        dedup.mark_processed("c");

        // "a" fell out of the window and would be reprocessed.
        assert!(!dedup.has_been_processed("a"));
        assert!(dedup.has_been_processed("b"));
        assert!(dedup.has_been_processed("c"));
        assert_eq!(dedup.len(), 2);
    }
}
