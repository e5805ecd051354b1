//! Event types for the feedmux bus
//!
//! Provides the per-view notification stream ([`ViewEvent`]), daemon-wide
//! service notifications ([`CoreEvent`]) and the [`EventBus`] both travel on.

use crate::record::{ItemRef, Record};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Notifications emitted by one view
///
/// A subscriber that applies every event in order reconstructs the view's
/// published set exactly. Batches are never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewEvent {
    /// New identities
    ItemsAdded { items: Vec<Arc<Record>> },

    /// Identities already published whose properties changed
    ItemsChanged { items: Vec<Arc<Record>> },

    /// Identities no longer published
    ItemsRemoved { items: Vec<ItemRef> },
}

impl ViewEvent {
    /// Get event type name (signal name on the bus)
    pub fn event_type(&self) -> &'static str {
        match self {
            ViewEvent::ItemsAdded { .. } => "ItemsAdded",
            ViewEvent::ItemsChanged { .. } => "ItemsChanged",
            ViewEvent::ItemsRemoved { .. } => "ItemsRemoved",
        }
    }

    /// Number of entries in the batch
    pub fn len(&self) -> usize {
        match self {
            ViewEvent::ItemsAdded { items } | ViewEvent::ItemsChanged { items } => items.len(),
            ViewEvent::ItemsRemoved { items } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Daemon-wide notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoreEvent {
    /// A service's dynamic capabilities changed (e.g. credentials rejected)
    CapabilitiesChanged {
        service: String,
        caps: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An identity was added to the ban list
    ItemHidden {
        uid: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Network reachability flipped; views stop or resume polling
    OnlineChanged {
        online: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl CoreEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CoreEvent::CapabilitiesChanged { .. } => "CapabilitiesChanged",
            CoreEvent::ItemHidden { .. } => "ItemHidden",
            CoreEvent::OnlineChanged { .. } => "OnlineChanged",
        }
    }
}

/// Broadcast bus for events of type `T`
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged subscribers are told how many events they missed
///
/// A lagged view subscriber can no longer reconstruct the published set and
/// must resubscribe.
#[derive(Debug)]
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> EventBus<T> {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
