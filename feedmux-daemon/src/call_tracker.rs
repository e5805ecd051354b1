//! Per-view registry of in-flight backend calls
//!
//! Every refresh cycle gets a generation number and one cycle
//! [`CancellationToken`]. Each registered call holds a child of that token, so
//! [`CallTracker::cancel_all`] stops the whole fan-out with a single cancel.
//!
//! A call is identified by [`CallId`]. Messages from a call that is no longer
//! registered (finished, cancelled, or from a superseded generation) are
//! discarded by the view, which makes cancellation authoritative even when a
//! completion raced it through the channel.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Identity of one backend call within a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId {
    pub generation: u64,
    pub seq: u64,
}

impl CallId {
    /// The call issued directly by `refresh()` for a generation
    pub fn root(generation: u64) -> Self {
        Self { generation, seq: 0 }
    }

    pub fn is_root(&self) -> bool {
        self.seq == 0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.generation, self.seq)
    }
}

/// One outstanding call
#[derive(Debug)]
pub struct CallHandle {
    label: String,
    token: CancellationToken,
}

impl CallHandle {
    pub fn new(label: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            label: label.into(),
            token,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Registry of outstanding calls for the current cycle
#[derive(Debug)]
pub struct CallTracker {
    generation: u64,
    cycle_token: CancellationToken,
    calls: HashMap<CallId, CallHandle>,
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTracker {
    pub fn new() -> Self {
        let cycle_token = CancellationToken::new();
        // Generation 0 never runs calls
        cycle_token.cancel();
        Self {
            generation: 0,
            cycle_token,
            calls: HashMap::new(),
        }
    }

    /// Cancel the current cycle and open a new generation
    ///
    /// Returns the new generation and its cycle token.
    pub fn begin_cycle(&mut self) -> (u64, CancellationToken) {
        self.cancel_all();
        self.generation += 1;
        self.cycle_token = CancellationToken::new();
        (self.generation, self.cycle_token.clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Register a call
    ///
    /// Refused (and the call's token cancelled) when the call belongs to a
    /// superseded generation or the current cycle was already cancelled.
    pub fn register(&mut self, id: CallId, handle: CallHandle) -> bool {
        if id.generation != self.generation || self.cycle_token.is_cancelled() {
            handle.token.cancel();
            return false;
        }
        self.calls.insert(id, handle);
        true
    }

    /// Remove a call; returns whether it was registered
    ///
    /// Idempotent: unregistering an unknown or already removed call is a no-op.
    pub fn unregister(&mut self, id: CallId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Whether messages from `id` should still be honored
    pub fn contains(&self, id: CallId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Labels of the outstanding calls, for diagnostics
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<_> = self
            .calls
            .iter()
            .map(|(id, handle)| format!("{} {}", id, handle.label()))
            .collect();
        labels.sort();
        labels
    }

    /// Unregister every call and signal cancellation to each of them
    ///
    /// Returns how many calls were outstanding.
    pub fn cancel_all(&mut self) -> usize {
        self.cycle_token.cancel();
        let count = self.calls.len();
        for (_, handle) in self.calls.drain() {
            handle.token.cancel();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(tracker: &CallTracker) -> CancellationToken {
        tracker.cycle_token.child_token()
    }

    #[test]
    fn test_new_tracker_is_empty() {
        let tracker = CallTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.generation(), 0);
    }

    #[test]
    fn test_register_and_unregister() {
        let mut tracker = CallTracker::new();
        let (generation, _) = tracker.begin_cycle();
        let id = CallId::root(generation);

        assert!(tracker.register(id, CallHandle::new("fetch", child(&tracker))));
        assert!(!tracker.is_empty());
        assert!(tracker.contains(id));

        assert!(tracker.unregister(id));
        assert!(!tracker.unregister(id));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cancel_all_cancels_tokens() {
        let mut tracker = CallTracker::new();
        let (generation, cycle) = tracker.begin_cycle();

        let token = child(&tracker);
        tracker.register(CallId::root(generation), CallHandle::new("fetch", token.clone()));
        tracker.register(
            CallId { generation, seq: 1 },
            CallHandle::new("avatar", child(&tracker)),
        );

        assert_eq!(tracker.cancel_all(), 2);
        assert!(tracker.is_empty());
        assert!(token.is_cancelled());
        assert!(cycle.is_cancelled());
    }

    #[test]
    fn test_stale_generation_refused() {
        let mut tracker = CallTracker::new();
        let (first, _) = tracker.begin_cycle();
        let (second, _) = tracker.begin_cycle();
        assert_eq!(second, first + 1);

        let token = CancellationToken::new();
        let stale = CallId { generation: first, seq: 3 };
        assert!(!tracker.register(stale, CallHandle::new("late", token.clone())));
        assert!(token.is_cancelled());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_register_after_cancel_refused() {
        let mut tracker = CallTracker::new();
        let (generation, _) = tracker.begin_cycle();
        tracker.cancel_all();

        let id = CallId { generation, seq: 1 };
        assert!(!tracker.register(id, CallHandle::new("late", CancellationToken::new())));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_labels_sorted() {
        let mut tracker = CallTracker::new();
        let (generation, _) = tracker.begin_cycle();
        tracker.register(CallId { generation, seq: 2 }, CallHandle::new("b", child(&tracker)));
        tracker.register(CallId::root(generation), CallHandle::new("a", child(&tracker)));

        assert_eq!(tracker.labels(), vec!["1.0 a".to_string(), "1.2 b".to_string()]);
    }
}
