//! View state machine
//!
//! A view fetches one query from one backend, diffs each fetch against what
//! it last published, and emits the difference as `ItemsRemoved`,
//! `ItemsAdded` and `ItemsChanged` batches (in that order).
//!
//! Each view runs as its own task. The task owns all view state and reacts
//! to three inputs:
//! - commands from [`ViewHandle`] (start, refresh, stop, close, recalculate)
//! - messages from in-flight backend calls (registrations, batches, completions)
//! - the refresh timer while running and online
//!
//! plus the daemon's online flag: offline a running view keeps serving what
//! it has but stops polling.
//!
//! States: `Idle -> Running -> Stopped`, plus terminal `Closed` reachable from
//! any state. A cycle publishes only when its call tracker drains, and only
//! the latest cycle's results are ever diffed. Batches are staged per call
//! and merged when the cycle completes, so a call that fails after
//! submitting contributes nothing.

use crate::backend::{run_call, Backend, BackendError, CallMessage, CallScope};
use crate::banned::{self, SharedBans};
use crate::cache::{CacheKey, ResultCache};
use crate::call_tracker::{CallHandle, CallId, CallTracker};
use crate::error::ViewError;
use feedmux_common::events::{CoreEvent, EventBus, ViewEvent};
use feedmux_common::{DeltaSet, ItemRef, Params, Record, SetDiff};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const COMMAND_CAPACITY: usize = 32;

/// Lifecycle state of a view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewState {
    #[default]
    Idle,
    Running,
    Stopped,
    Closed,
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewState::Idle => "idle",
            ViewState::Running => "running",
            ViewState::Stopped => "stopped",
            ViewState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Observable view status, updated after every input the view handles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewStatus {
    pub state: ViewState,
    /// Size of the published set
    pub published: usize,
    /// Calls outstanding in the current cycle
    pub in_flight: usize,
    /// Current cycle generation (0 before the first refresh)
    pub generation: u64,
    pub cycles_published: u64,
    pub cycles_abandoned: u64,
}

/// Per-view settings
#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub id: Uuid,
    pub query: String,
    pub params: Params,
    pub refresh_interval: Duration,
    pub event_capacity: usize,
}

/// Services a view depends on
#[derive(Clone)]
pub struct ViewDeps {
    pub cache: Arc<ResultCache>,
    pub bans: SharedBans,
    pub core_events: EventBus<CoreEvent>,
    pub online: watch::Receiver<bool>,
}

type Reply = oneshot::Sender<Result<(), ViewError>>;

enum Command {
    Start(Reply),
    Refresh(Reply),
    Stop(Reply),
    Close(Reply),
    Recalculate,
    Snapshot(oneshot::Sender<Vec<Arc<Record>>>),
}

/// Cloneable handle to a running view task
#[derive(Clone)]
pub struct ViewHandle {
    id: Uuid,
    service: String,
    query: String,
    params: Params,
    commands: mpsc::Sender<Command>,
    events: EventBus<ViewEvent>,
    status: watch::Receiver<ViewStatus>,
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl ViewHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Bus address of the view
    pub fn path(&self) -> String {
        format!("/views/{}", self.id)
    }

    pub async fn start(&self) -> Result<(), ViewError> {
        self.request(Command::Start).await
    }

    pub async fn refresh(&self) -> Result<(), ViewError> {
        self.request(Command::Refresh).await
    }

    pub async fn stop(&self) -> Result<(), ViewError> {
        self.request(Command::Stop).await
    }

    pub async fn close(&self) -> Result<(), ViewError> {
        self.request(Command::Close).await
    }

    /// Drop newly banned identities from the published set
    pub async fn recalculate(&self) {
        let _ = self.commands.send(Command::Recalculate).await;
    }

    /// Current published set
    pub async fn snapshot(&self) -> Result<Vec<Arc<Record>>, ViewError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .await
            .map_err(|_| ViewError::Closed)?;
        rx.await.map_err(|_| ViewError::Closed)
    }

    /// Subscribe to this view's notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ViewStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status update
    pub fn watch_status(&self) -> watch::Receiver<ViewStatus> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.status.borrow().state == ViewState::Closed
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), ViewError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| ViewError::Closed)?;
        rx.await.map_err(|_| ViewError::Closed)?
    }
}

/// View task state
pub struct View {
    id: Uuid,
    backend: Arc<dyn Backend>,
    query: String,
    params: Params,
    key: CacheKey,
    refresh_interval: Duration,

    state: ViewState,
    published: DeltaSet,
    /// Batches of the current cycle in arrival order
    staged: Vec<(CallId, Vec<Record>)>,
    calls: CallTracker,
    cycle_failed: bool,
    timer: Option<Interval>,
    online: watch::Receiver<bool>,
    online_open: bool,
    cycles_published: u64,
    cycles_abandoned: u64,

    deps: ViewDeps,
    events: EventBus<ViewEvent>,
    status_tx: watch::Sender<ViewStatus>,
    call_tx: mpsc::UnboundedSender<CallMessage>,
}

impl View {
    /// Spawn a view task in the `Idle` state
    pub fn spawn(backend: Arc<dyn Backend>, config: ViewConfig, deps: ViewDeps) -> ViewHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ViewStatus::default());
        let events = EventBus::new(config.event_capacity);

        let handle = ViewHandle {
            id: config.id,
            service: backend.name().to_string(),
            query: config.query.clone(),
            params: config.params.clone(),
            commands: command_tx,
            events: events.clone(),
            status: status_rx,
        };

        let view = View {
            id: config.id,
            key: CacheKey::new(backend.name(), &config.query, &config.params),
            backend,
            query: config.query,
            params: config.params,
            refresh_interval: config.refresh_interval,
            state: ViewState::Idle,
            published: DeltaSet::new(),
            staged: Vec::new(),
            calls: CallTracker::new(),
            cycle_failed: false,
            timer: None,
            online: deps.online.clone(),
            online_open: true,
            cycles_published: 0,
            cycles_abandoned: 0,
            deps,
            events,
            status_tx,
            call_tx,
        };

        debug!(view = %view.id, service = %handle.service, query = %view.query, "View opened");
        tokio::spawn(view.run(command_rx, call_rx));
        handle
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut call_rx: mpsc::UnboundedReceiver<CallMessage>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!(view = %self.id, "All handles dropped");
                        self.close();
                    }
                },
                Some(message) = call_rx.recv() => self.handle_call_message(message).await,
                _ = next_tick(&mut self.timer) => {
                    debug!(view = %self.id, "Timer refresh");
                    self.refresh();
                }
                changed = self.online.changed(), if self.online_open => match changed {
                    Ok(()) => {
                        let online = *self.online.borrow_and_update();
                        self.online_changed(online);
                    }
                    // Core is gone; the flag is frozen
                    Err(_) => self.online_open = false,
                },
            }

            self.publish_status();
            if self.state == ViewState::Closed {
                break;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Refresh(reply) => {
                let result = self
                    .require("refresh", &[ViewState::Running, ViewState::Stopped])
                    .map(|_| {
                        if let Some(timer) = self.timer.as_mut() {
                            timer.reset();
                        }
                        self.refresh();
                    });
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let result = self.require("stop", &[ViewState::Running]).map(|_| self.stop());
                let _ = reply.send(result);
            }
            Command::Close(reply) => {
                let result = self
                    .require(
                        "close",
                        &[ViewState::Idle, ViewState::Running, ViewState::Stopped],
                    )
                    .map(|_| self.close());
                let _ = reply.send(result);
            }
            Command::Recalculate => self.recalculate().await,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.published.as_list());
            }
        }
    }

    fn require(&self, operation: &'static str, allowed: &[ViewState]) -> Result<(), ViewError> {
        if self.state == ViewState::Closed {
            return Err(ViewError::Closed);
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ViewError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    async fn start(&mut self) -> Result<(), ViewError> {
        self.require("start", &[ViewState::Idle])?;

        match self.deps.cache.load(&self.key, &self.deps.bans).await {
            Ok(Some(cached)) if !cached.is_empty() => {
                info!(view = %self.id, "Publishing {} cached items", cached.len());
                self.published = cached;
                self.emit(ViewEvent::ItemsAdded {
                    items: self.published.as_list(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    view = %self.id,
                    "Cache unavailable for {}, starting without baseline: {}", self.key, e
                );
            }
        }

        self.state = ViewState::Running;
        if *self.online.borrow_and_update() {
            info!(view = %self.id, "View started (refresh every {:?})", self.refresh_interval);
            self.arm_timer();
            self.refresh();
        } else {
            info!(view = %self.id, "View started offline, serving cache only");
        }
        Ok(())
    }

    fn arm_timer(&mut self) {
        let period = self.refresh_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(interval);
    }

    fn online_changed(&mut self, online: bool) {
        if self.state != ViewState::Running {
            return;
        }
        if online {
            debug!(view = %self.id, "Back online, refreshing");
            self.arm_timer();
            self.refresh();
        } else {
            debug!(view = %self.id, "Offline, polling paused");
            self.timer = None;
        }
    }

    /// Cancel the current cycle and fetch again
    fn refresh(&mut self) {
        let cancelled = self.calls.cancel_all();
        if cancelled > 0 {
            debug!(view = %self.id, "Superseding {} in-flight calls", cancelled);
        }

        let (generation, cycle) = self.calls.begin_cycle();
        self.staged.clear();
        self.cycle_failed = false;

        let scope = CallScope::root(generation, cycle, self.call_tx.clone());
        self.calls
            .register(scope.call_id(), CallHandle::new("fetch", scope.token().clone()));
        debug!(view = %self.id, generation, "Refresh cycle started");

        let backend = Arc::clone(&self.backend);
        let query = self.query.clone();
        let params = self.params.clone();
        let fetch_scope = scope.clone();
        tokio::spawn(run_call(scope, async move {
            backend.authenticate().await?;
            backend.fetch(&query, &params, fetch_scope).await
        }));
    }

    fn stop(&mut self) {
        if !self.calls.is_empty() {
            debug!(view = %self.id, calls = ?self.calls.labels(), "Cancelling calls");
        }
        self.calls.cancel_all();
        self.staged.clear();
        self.timer = None;
        self.state = ViewState::Stopped;
        info!(view = %self.id, "View stopped");
    }

    fn close(&mut self) {
        self.calls.cancel_all();
        self.timer = None;
        self.staged.clear();
        self.published.empty();
        self.state = ViewState::Closed;
        info!(view = %self.id, "View closed");
    }

    async fn handle_call_message(&mut self, message: CallMessage) {
        match message {
            CallMessage::Registered { call, label, token } => {
                if self.calls.register(call, CallHandle::new(label, token)) {
                    trace!(view = %self.id, %call, "Secondary call registered");
                } else {
                    trace!(view = %self.id, %call, "Discarding stale registration");
                }
            }
            CallMessage::Batch { call, records } => {
                if self.calls.contains(call) {
                    trace!(view = %self.id, %call, staged = records.len(), "Batch staged");
                    self.staged.push((call, records));
                } else {
                    trace!(view = %self.id, %call, "Discarding stale batch");
                }
            }
            CallMessage::Finished { call, result } => {
                if !self.calls.unregister(call) {
                    trace!(view = %self.id, %call, "Discarding stale completion");
                    return;
                }
                if let Err(e) = result {
                    self.call_failed(call, e).await;
                }
                if self.calls.is_empty() {
                    self.finish_cycle().await;
                }
            }
        }
    }

    /// Merge the staged batches in arrival order, dropping banned identities
    fn merge_staged(&mut self) -> DeltaSet {
        let bans = banned::read(&self.deps.bans);
        let mut fresh = DeltaSet::new();

        for (call, records) in self.staged.drain(..) {
            let mut seen = HashSet::with_capacity(records.len());
            for record in records {
                if bans.is_banned(record.identity()) {
                    trace!(view = %self.id, uid = %record.identity(), "Skipping banned item");
                    continue;
                }
                if !seen.insert(record.identity().to_string()) {
                    debug!(
                        view = %self.id, %call, uid = %record.identity(),
                        "Duplicate identity in batch, keeping the last"
                    );
                }
                fresh.put(Arc::new(record));
            }
        }
        fresh
    }

    async fn call_failed(&mut self, call: CallId, err: BackendError) {
        match err {
            BackendError::Auth(_) => {
                warn!(view = %self.id, service = %self.backend.name(), "{}", err);
                self.cycle_failed = true;
                if let Err(e) = self.deps.cache.drop_entry(&self.key).await {
                    warn!(view = %self.id, "Cannot drop cache for {}: {}", self.key, e);
                }
                self.deps.core_events.emit_lossy(CoreEvent::CapabilitiesChanged {
                    service: self.backend.name().to_string(),
                    caps: self.backend.dynamic_caps(),
                    timestamp: chrono::Utc::now(),
                });
            }
            _ if call.is_root() => {
                warn!(view = %self.id, "Fetch failed, keeping published set: {}", err);
                self.cycle_failed = true;
            }
            _ => {
                let before = self.staged.len();
                self.staged.retain(|(staged, _)| *staged != call);
                warn!(
                    view = %self.id, %call, dropped = before - self.staged.len(),
                    "Secondary call failed, dropping its branch: {}", err
                );
            }
        }
    }

    async fn finish_cycle(&mut self) {
        if self.cycle_failed {
            self.staged.clear();
            self.cycles_abandoned += 1;
            info!(view = %self.id, generation = self.calls.generation(), "Cycle abandoned");
            return;
        }

        let fresh = self.merge_staged();
        let diff = DeltaSet::diff(&self.published, &fresh);
        debug!(
            view = %self.id,
            removed = diff.removed.len(),
            added = diff.added.len(),
            changed = diff.changed.len(),
            "Cycle complete"
        );
        self.emit_diff(diff);
        self.published = fresh;
        self.cycles_published += 1;

        if let Err(e) = self.deps.cache.save(&self.key, &self.published).await {
            warn!(view = %self.id, "Cannot write cache for {}: {}", self.key, e);
        }
    }

    /// Drop banned identities from published
    ///
    /// Staged batches are filtered when they merge.
    async fn recalculate(&mut self) {
        if self.state == ViewState::Closed {
            return;
        }

        let removed: Vec<ItemRef> = {
            let bans = banned::read(&self.deps.bans);
            self.published
                .iter()
                .filter(|record| bans.is_banned(record.identity()))
                .map(|record| record.item_ref())
                .collect()
        };

        if removed.is_empty() {
            return;
        }
        for item in &removed {
            self.published.remove(&item.id);
        }

        debug!(view = %self.id, "Recalculated, {} items now hidden", removed.len());
        self.emit(ViewEvent::ItemsRemoved { items: removed });

        if let Err(e) = self.deps.cache.save(&self.key, &self.published).await {
            warn!(view = %self.id, "Cannot write cache for {}: {}", self.key, e);
        }
    }

    fn emit_diff(&self, diff: SetDiff) {
        let SetDiff {
            removed,
            added,
            changed,
        } = diff;
        self.emit(ViewEvent::ItemsRemoved { items: removed });
        self.emit(ViewEvent::ItemsAdded { items: added });
        self.emit(ViewEvent::ItemsChanged { items: changed });
    }

    /// Emit a batch; empty batches are never sent
    fn emit(&self, event: ViewEvent) {
        if event.is_empty() {
            return;
        }
        trace!(view = %self.id, "Emitting {} ({})", event.event_type(), event.len());
        self.events.emit_lossy(event);
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ViewStatus {
            state: self.state,
            published: self.published.len(),
            in_flight: self.calls.len(),
            generation: self.calls.generation(),
            cycles_published: self.cycles_published,
            cycles_abandoned: self.cycles_abandoned,
        });
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
