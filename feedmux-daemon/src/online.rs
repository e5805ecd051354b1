//! Network reachability as seen by the daemon
//!
//! Views watch this flag: while offline they serve their cache and do not
//! poll; going online re-arms their timers and fetches at once.

use tokio::sync::watch;

#[derive(Debug)]
pub struct OnlineState {
    tx: watch::Sender<bool>,
}

impl OnlineState {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that observes every transition
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Set the flag; returns whether it changed
    pub fn set(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        })
    }
}

impl Default for OnlineState {
    fn default() -> Self {
        Self::new(true)
    }
}
