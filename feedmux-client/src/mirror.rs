//! Client-side replica of a view's published set
//!
//! Fed exclusively by one view's ordered notification stream. After every
//! applied batch the mirror holds exactly the identities and property values
//! the daemon has published.

use feedmux_common::events::ViewEvent;
use feedmux_common::Record;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ClientMirror {
    items: HashMap<String, Arc<Record>>,
    closed: bool,
}

impl ClientMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one batch, returning the records it affected
    ///
    /// For removals the returned records are the ones dropped. A change for
    /// an identity the mirror has never seen is ignored, as is a removal of
    /// an unknown identity. A torn-down mirror ignores everything.
    pub fn apply(&mut self, event: &ViewEvent) -> Vec<Arc<Record>> {
        if self.closed {
            return Vec::new();
        }

        match event {
            ViewEvent::ItemsAdded { items } => {
                for record in items {
                    self.items
                        .insert(record.identity().to_string(), Arc::clone(record));
                }
                items.clone()
            }
            ViewEvent::ItemsChanged { items } => {
                let mut affected = Vec::with_capacity(items.len());
                for record in items {
                    match self.items.get_mut(record.identity()) {
                        Some(slot) => {
                            *slot = Arc::clone(record);
                            affected.push(Arc::clone(record));
                        }
                        None => {
                            warn!(uid = %record.identity(), "Item changed before added, ignoring");
                        }
                    }
                }
                affected
            }
            ViewEvent::ItemsRemoved { items } => items
                .iter()
                .filter_map(|item| self.items.remove(&item.id))
                .collect(),
        }
    }

    /// Drop the replica; the publisher is gone
    pub fn teardown(&mut self) {
        if !self.closed {
            debug!("Tearing down mirror with {} items", self.items.len());
        }
        self.items.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&Arc<Record>> {
        self.items.get(identity)
    }

    /// Records newest first
    pub fn snapshot(&self) -> Vec<Arc<Record>> {
        let mut records: Vec<_> = self.items.values().cloned().collect();
        records.sort_by(|a, b| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then_with(|| a.identity().cmp(b.identity()))
        });
        records
    }
}
