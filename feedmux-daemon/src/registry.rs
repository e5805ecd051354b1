//! Daemon core: backend registry, open views and item hiding

use crate::backend::Backend;
use crate::banned::{self, SharedBans};
use crate::cache::ResultCache;
use crate::client_monitor::ClientMonitor;
use crate::error::{CoreError, ViewError};
use crate::online::OnlineState;
use crate::view::{View, ViewConfig, ViewDeps, ViewHandle};
use feedmux_common::events::{CoreEvent, EventBus};
use feedmux_common::params::query_or_default;
use feedmux_common::Params;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Settings shared by every view the core opens
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub refresh_interval: Duration,
    pub event_capacity: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            event_capacity: 1000,
        }
    }
}

/// One entry of `GET /services`
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub static_caps: Vec<String>,
    pub dynamic_caps: Vec<String>,
}

pub struct Core {
    backends: BTreeMap<String, Arc<dyn Backend>>,
    views: RwLock<HashMap<Uuid, ViewHandle>>,
    settings: CoreSettings,
    deps: ViewDeps,
    monitor: ClientMonitor,
    online: OnlineState,
    /// Serializes hides so ban list snapshots reach disk in order
    hide_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl Core {
    pub fn new(settings: CoreSettings, cache: ResultCache, bans: SharedBans) -> Self {
        let core_events = EventBus::new(settings.event_capacity);
        let online = OnlineState::default();
        Self {
            backends: BTreeMap::new(),
            views: RwLock::new(HashMap::new()),
            deps: ViewDeps {
                cache: Arc::new(cache),
                bans,
                core_events,
                online: online.watch(),
            },
            settings,
            monitor: ClientMonitor::new(),
            online,
            hide_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a backend under its name, replacing any previous one
    pub fn register_backend(&mut self, backend: Arc<dyn Backend>) {
        info!("Registered service {}", backend.name());
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register_backend(backend);
        self
    }

    pub fn services(&self) -> Vec<ServiceInfo> {
        self.backends
            .values()
            .map(|backend| ServiceInfo {
                name: backend.name().to_string(),
                static_caps: backend.static_caps(),
                dynamic_caps: backend.dynamic_caps(),
            })
            .collect()
    }

    pub fn events(&self) -> &EventBus<CoreEvent> {
        &self.deps.core_events
    }

    pub fn bans(&self) -> &SharedBans {
        &self.deps.bans
    }

    pub fn monitor(&self) -> &ClientMonitor {
        &self.monitor
    }

    pub fn is_online(&self) -> bool {
        self.online.is_online()
    }

    /// Flip network reachability for every view
    ///
    /// Returns whether the state changed; only a change is announced.
    pub fn set_online(&self, online: bool) -> bool {
        if !self.online.set(online) {
            return false;
        }
        info!(online, "Online state changed");
        self.deps.core_events.emit_lossy(CoreEvent::OnlineChanged {
            online,
            timestamp: chrono::Utc::now(),
        });
        true
    }

    /// Open a view of `query` on `service`
    ///
    /// The view starts `Idle`. When `owner` is given the view is reclaimed
    /// once that peer's last event stream closes.
    pub async fn open_view(
        &self,
        service: &str,
        query: Option<&str>,
        params: Params,
        owner: Option<&str>,
    ) -> Result<ViewHandle, CoreError> {
        let backend = self
            .backends
            .get(service)
            .cloned()
            .ok_or_else(|| CoreError::UnknownService(service.to_string()))?;

        let config = ViewConfig {
            id: Uuid::new_v4(),
            query: query_or_default(query).to_string(),
            params,
            refresh_interval: self.settings.refresh_interval,
            event_capacity: self.settings.event_capacity,
        };
        let handle = View::spawn(backend, config, self.deps.clone());

        if let Some(peer) = owner {
            self.monitor.track_view(peer, handle.id());
        }
        self.views.write().await.insert(handle.id(), handle.clone());

        info!(view = %handle.id(), service, query = %handle.query(), "Opened view");
        Ok(handle)
    }

    pub async fn view(&self, id: Uuid) -> Result<ViewHandle, CoreError> {
        self.views
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::UnknownView(id))
    }

    pub async fn views(&self) -> Vec<ViewHandle> {
        self.views.read().await.values().cloned().collect()
    }

    /// Close a view and drop it from the registry
    pub async fn close_view(&self, id: Uuid) -> Result<(), CoreError> {
        let handle = self
            .views
            .write()
            .await
            .remove(&id)
            .ok_or(CoreError::UnknownView(id))?;
        self.monitor.forget_view(id);

        match handle.close().await {
            Ok(()) | Err(ViewError::Closed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ban `uid` and make every open view drop it
    ///
    /// Returns whether the identity was newly banned. If the ban list cannot
    /// be written the ban still applies for this process and the error is
    /// returned after views have been recalculated.
    pub async fn hide_item(&self, uid: &str) -> Result<bool, CoreError> {
        let _serial = self.hide_lock.lock().await;

        let newly_banned = banned::write(&self.deps.bans).ban(uid)?;
        if !newly_banned {
            debug!(uid, "Item already hidden");
            return Ok(false);
        }
        info!(uid, "Hiding item");

        self.deps.core_events.emit_lossy(CoreEvent::ItemHidden {
            uid: uid.to_string(),
            timestamp: chrono::Utc::now(),
        });
        for view in self.views().await {
            view.recalculate().await;
        }

        let snapshot = banned::read(&self.deps.bans).snapshot();
        if let Some((path, content)) = snapshot {
            if let Err(e) = banned::persist(&path, content).await {
                warn!("Cannot write ban list {}: {}", path.display(), e);
                return Err(e.into());
            }
        }
        Ok(true)
    }

    /// Count a live event stream for `peer` until the guard drops
    pub fn connect_peer(self: &Arc<Self>, peer: &str) -> PeerGuard {
        self.monitor.connect(peer);
        PeerGuard {
            core: Arc::downgrade(self),
            peer: peer.to_string(),
        }
    }

    /// Cancelled once the daemon begins shutting down
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Close every open view and end the core event streams
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<Uuid> = self.views.read().await.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.close_view(id).await {
                warn!(view = %id, "Close during shutdown failed: {}", e);
            }
        }
    }
}

/// Live event stream of one peer
///
/// Dropping the last guard of a peer closes the views that peer owns.
pub struct PeerGuard {
    core: Weak<Core>,
    peer: String,
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let orphaned = core.monitor.disconnect(&self.peer);
        if orphaned.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(peer = %self.peer, "No runtime to reclaim {} views", orphaned.len());
            return;
        };
        runtime.spawn(async move {
            for id in orphaned {
                match core.close_view(id).await {
                    Ok(()) => debug!(view = %id, "Reclaimed view"),
                    Err(e) => debug!(view = %id, "Reclaim skipped: {}", e),
                }
            }
        });
    }
}
