//! Peer bookkeeping for view reclamation
//!
//! A peer is a named client process (sent in the `x-feedmux-client` header).
//! The monitor counts each peer's live event streams and remembers which
//! views it opened. When a peer that had streams drops to zero, its views
//! are handed back to the core for closing.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// Header carrying the peer name
pub const PEER_HEADER: &str = "x-feedmux-client";

#[derive(Debug, Default)]
struct Peer {
    streams: usize,
    views: HashSet<Uuid>,
}

#[derive(Debug, Default)]
pub struct ClientMonitor {
    peers: Mutex<HashMap<String, Peer>>,
}

impl ClientMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Peer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `peer` owns `view`
    pub fn track_view(&self, peer: &str, view: Uuid) {
        self.lock().entry(peer.to_string()).or_default().views.insert(view);
    }

    /// Forget `view` for whichever peer owned it
    pub fn forget_view(&self, view: Uuid) {
        let mut peers = self.lock();
        for peer in peers.values_mut() {
            peer.views.remove(&view);
        }
        peers.retain(|_, peer| peer.streams > 0 || !peer.views.is_empty());
    }

    /// A stream from `peer` opened
    pub fn connect(&self, peer: &str) {
        let mut peers = self.lock();
        let entry = peers.entry(peer.to_string()).or_default();
        entry.streams += 1;
        debug!(peer, streams = entry.streams, "Peer stream opened");
    }

    /// A stream from `peer` closed
    ///
    /// Returns the peer's views when this was its last stream.
    pub fn disconnect(&self, peer: &str) -> Vec<Uuid> {
        let mut peers = self.lock();
        let Some(entry) = peers.get_mut(peer) else {
            return Vec::new();
        };

        entry.streams = entry.streams.saturating_sub(1);
        if entry.streams > 0 {
            return Vec::new();
        }

        let views: Vec<Uuid> = peers
            .remove(peer)
            .map(|entry| entry.views.into_iter().collect())
            .unwrap_or_default();
        if !views.is_empty() {
            info!(peer, "Peer gone, reclaiming {} views", views.len());
        }
        views
    }

    pub fn stream_count(&self, peer: &str) -> usize {
        self.lock().get(peer).map(|p| p.streams).unwrap_or(0)
    }

    pub fn owned_views(&self, peer: &str) -> Vec<Uuid> {
        self.lock()
            .get(peer)
            .map(|p| p.views.iter().copied().collect())
            .unwrap_or_default()
    }
}
