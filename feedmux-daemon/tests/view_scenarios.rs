//! View state-machine scenarios driven by a scripted backend
//!
//! Each test spawns one view directly (no HTTP) and watches its notification
//! bus and status channel.

use async_trait::async_trait;
use feedmux_client::ClientMirror;
use feedmux_common::events::{CoreEvent, EventBus, ViewEvent};
use feedmux_common::{DeltaSet, Params, Record};
use feedmux_daemon::banned::{self, BanRegistry, SharedBans};
use feedmux_daemon::cache::{CacheKey, ResultCache};
use feedmux_daemon::view::{View, ViewConfig, ViewDeps};
use feedmux_daemon::{
    Backend, BackendError, CallScope, ViewError, ViewHandle, ViewState, ViewStatus,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// What one fetch does
#[derive(Clone, Default)]
struct Poll {
    items: Vec<Record>,
    gate: Option<Arc<Notify>>,
    error: Option<BackendError>,
    children: Vec<Child>,
}

/// A secondary call spawned by a fetch
///
/// Submits `items` before failing with `error`, if any.
#[derive(Clone, Default)]
struct Child {
    items: Vec<Record>,
    gate: Option<Arc<Notify>>,
    error: Option<BackendError>,
}

impl Poll {
    fn items(items: Vec<Record>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    fn gated(items: Vec<Record>, gate: &Arc<Notify>) -> Self {
        Self {
            items,
            gate: Some(Arc::clone(gate)),
            ..Default::default()
        }
    }

    fn failing(error: BackendError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Plays back one [`Poll`] per fetch, repeating the last one when exhausted
struct ScriptedBackend {
    polls: Vec<Poll>,
    next: AtomicUsize,
    fetches: AtomicUsize,
    auth_error: Mutex<Option<BackendError>>,
}

impl ScriptedBackend {
    fn new(polls: Vec<Poll>) -> Arc<Self> {
        Arc::new(Self {
            polls,
            next: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            auth_error: Mutex::new(None),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn reject_credentials(&self) {
        *self.auth_error.lock().unwrap() = Some(BackendError::Auth("token expired".to_string()));
    }

    fn next_poll(&self) -> Poll {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.polls
            .get(index)
            .or_else(|| self.polls.last())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn dynamic_caps(&self) -> Vec<String> {
        vec!["credentials-invalid".to_string()]
    }

    async fn authenticate(&self) -> Result<(), BackendError> {
        match self.auth_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch(
        &self,
        _query: &str,
        _params: &Params,
        scope: CallScope,
    ) -> Result<(), BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let poll = self.next_poll();

        if let Some(gate) = &poll.gate {
            gate.notified().await;
        }
        if let Some(err) = poll.error {
            return Err(err);
        }

        scope.submit(poll.items);
        for child in poll.children {
            scope.spawn("child", |child_scope| async move {
                if let Some(gate) = &child.gate {
                    gate.notified().await;
                }
                child_scope.submit(child.items);
                match child.error {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn rec(id: &str, title: &str) -> Record {
    Record::builder("scripted", id, 1_700_000_000)
        .put("title", title)
        .build()
}

fn ids(records: &[Arc<Record>]) -> HashSet<String> {
    records.iter().map(|r| r.identity().to_string()).collect()
}

fn set_of(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

struct Harness {
    _dir: TempDir,
    backend: Arc<ScriptedBackend>,
    view: ViewHandle,
    events: broadcast::Receiver<ViewEvent>,
    core_events: broadcast::Receiver<CoreEvent>,
    bans: SharedBans,
    cache: Arc<ResultCache>,
    online: watch::Sender<bool>,
}

impl Harness {
    fn new(polls: Vec<Poll>) -> Self {
        Self::build(polls, Duration::from_secs(3600), true)
    }

    fn with_interval(polls: Vec<Poll>, refresh_interval: Duration) -> Self {
        Self::build(polls, refresh_interval, true)
    }

    fn offline(polls: Vec<Poll>, refresh_interval: Duration) -> Self {
        Self::build(polls, refresh_interval, false)
    }

    fn build(polls: Vec<Poll>, refresh_interval: Duration, online: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ResultCache::new(
            dir.path().join("cache"),
            dir.path().join("thumbnails"),
        ));
        let bans = BanRegistry::load(dir.path().join("banned.txt")).into_shared();
        let core_bus = EventBus::new(16);
        let core_events = core_bus.subscribe();
        let (online, online_rx) = watch::channel(online);

        let backend = ScriptedBackend::new(polls);
        let view = View::spawn(
            backend.clone(),
            ViewConfig {
                id: Uuid::new_v4(),
                query: "feed".to_string(),
                params: Params::new(),
                refresh_interval,
                event_capacity: 64,
            },
            ViewDeps {
                cache: Arc::clone(&cache),
                bans: Arc::clone(&bans),
                core_events: core_bus,
                online: online_rx,
            },
        );
        let events = view.subscribe();

        Self {
            _dir: dir,
            backend,
            view,
            events,
            core_events,
            bans,
            cache,
            online,
        }
    }

    fn key(&self) -> CacheKey {
        CacheKey::new("scripted", "feed", &Params::new())
    }

    async fn wait(&self, pred: impl FnMut(&ViewStatus) -> bool) -> ViewStatus {
        self.wait_within(WAIT, pred).await
    }

    async fn wait_within(
        &self,
        within: Duration,
        pred: impl FnMut(&ViewStatus) -> bool,
    ) -> ViewStatus {
        let mut rx = self.view.watch_status();
        let status = tokio::time::timeout(within, rx.wait_for(pred))
            .await
            .expect("timed out waiting for view status")
            .expect("view task ended");
        status.clone()
    }

    async fn next_event(&mut self) -> ViewEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed")
    }

    fn assert_quiet(&mut self) {
        match self.events.try_recv() {
            Err(TryRecvError::Empty) => {}
            other => panic!("expected no notification, got {:?}", other),
        }
    }
}

fn added(event: ViewEvent) -> Vec<Arc<Record>> {
    match event {
        ViewEvent::ItemsAdded { items } => items,
        other => panic!("expected ItemsAdded, got {:?}", other),
    }
}

fn changed(event: ViewEvent) -> Vec<Arc<Record>> {
    match event {
        ViewEvent::ItemsChanged { items } => items,
        other => panic!("expected ItemsChanged, got {:?}", other),
    }
}

fn removed(event: ViewEvent) -> HashSet<String> {
    match event {
        ViewEvent::ItemsRemoved { items } => items.into_iter().map(|i| i.id).collect(),
        other => panic!("expected ItemsRemoved, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_poll_diff_removed_then_added() {
    let mut h = Harness::new(vec![
        Poll::items(vec![rec("u1", "one"), rec("u2", "two")]),
        Poll::items(vec![rec("u2", "two"), rec("u3", "three")]),
    ]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["u1", "u2"]));

    h.view.refresh().await.unwrap();
    h.wait(|s| s.cycles_published == 2).await;
    assert_eq!(removed(h.next_event().await), set_of(&["u1"]));
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["u3"]));
    h.assert_quiet();
}

#[tokio::test]
async fn test_unchanged_refresh_is_silent() {
    let mut h = Harness::new(vec![Poll::items(vec![rec("u1", "one"), rec("u2", "two")])]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    added(h.next_event().await);

    h.view.refresh().await.unwrap();
    h.wait(|s| s.cycles_published == 2).await;
    h.assert_quiet();
}

#[tokio::test]
async fn test_property_change_is_changed_not_remove_add() {
    let mut h = Harness::new(vec![
        Poll::items(vec![rec("u1", "one"), rec("u2", "two")]),
        Poll::items(vec![rec("u1", "one (edited)"), rec("u2", "two")]),
    ]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    added(h.next_event().await);

    h.view.refresh().await.unwrap();
    h.wait(|s| s.cycles_published == 2).await;
    let items = changed(h.next_event().await);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get_str("title"), Some("one (edited)"));
    h.assert_quiet();
}

#[tokio::test]
async fn test_banned_identity_never_added() {
    let mut h = Harness::new(vec![Poll::items(vec![rec("u1", "one"), rec("u2", "two")])]);
    banned::write(&h.bans).ban("u1").unwrap();

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["u2"]));
    h.assert_quiet();

    h.view.refresh().await.unwrap();
    h.wait(|s| s.cycles_published == 2).await;
    h.assert_quiet();
}

#[tokio::test]
async fn test_stop_before_fetch_completes_is_silent() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::new(vec![Poll::gated(vec![rec("u1", "one")], &gate)]);

    h.view.start().await.unwrap();
    h.wait(|s| s.in_flight == 1).await;

    h.view.stop().await.unwrap();
    let status = h.wait(|s| s.state == ViewState::Stopped).await;
    assert_eq!(status.in_flight, 0);

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.assert_quiet();
    let status = h.view.status();
    assert_eq!(status.cycles_published, 0);
    assert_eq!(status.in_flight, 0);
    assert!(h.view.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_publishes_cache_before_first_fetch() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::new(vec![Poll::gated(
        vec![rec("c1", "cached"), rec("n1", "new")],
        &gate,
    )]);
    h.cache
        .save(&h.key(), &DeltaSet::from_records(vec![Arc::new(rec("c1", "cached"))]))
        .await
        .unwrap();

    h.view.start().await.unwrap();
    let baseline = added(h.next_event().await);
    assert_eq!(ids(&baseline), set_of(&["c1"]));
    assert_eq!(h.view.status().cycles_published, 0);

    gate.notify_one();
    h.wait(|s| s.cycles_published == 1).await;
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["n1"]));
    h.assert_quiet();
}

#[tokio::test(start_paused = true)]
async fn test_explicit_refresh_supersedes_timer_refresh() {
    let stale_gate = Arc::new(Notify::new());
    let mut h = Harness::with_interval(
        vec![
            Poll::items(vec![rec("u1", "one")]),
            Poll::gated(vec![rec("stale", "stale")], &stale_gate),
            Poll::items(vec![rec("u2", "two")]),
        ],
        Duration::from_secs(60),
    );
    let long = Duration::from_secs(600);

    h.view.start().await.unwrap();
    h.wait_within(long, |s| s.cycles_published == 1).await;
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["u1"]));

    // Timer-driven cycle hangs on the gate
    h.wait_within(long, |s| s.generation == 2 && s.in_flight == 1).await;

    h.view.refresh().await.unwrap();
    stale_gate.notify_one();
    h.wait_within(long, |s| s.cycles_published == 2).await;

    assert_eq!(removed(h.next_event().await), set_of(&["u1"]));
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["u2"]));
    h.assert_quiet();
    assert!(h.backend.fetches() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_refresh_rearms_timer() {
    let h = Harness::with_interval(
        vec![Poll::items(vec![rec("u1", "one")])],
        Duration::from_secs(60),
    );
    let long = Duration::from_secs(600);

    h.view.start().await.unwrap();
    h.wait_within(long, |s| s.cycles_published == 1).await;

    tokio::time::sleep(Duration::from_secs(49)).await;
    h.view.refresh().await.unwrap();
    h.wait_within(long, |s| s.cycles_published == 2).await;

    // The tick due 60s after start was pushed back to 60s after the refresh
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(h.view.status().generation, 2);
    assert_eq!(h.backend.fetches(), 2);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let status = h.wait_within(long, |s| s.cycles_published == 3).await;
    assert_eq!(status.generation, 3);
    assert_eq!(h.backend.fetches(), 3);
}

#[tokio::test]
async fn test_start_offline_serves_cache_without_fetching() {
    let mut h = Harness::offline(
        vec![Poll::items(vec![rec("c1", "cached"), rec("n1", "new")])],
        Duration::from_secs(3600),
    );
    h.cache
        .save(&h.key(), &DeltaSet::from_records(vec![Arc::new(rec("c1", "cached"))]))
        .await
        .unwrap();

    h.view.start().await.unwrap();
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["c1"]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = h.view.status();
    assert_eq!(status.state, ViewState::Running);
    assert_eq!(status.generation, 0);
    assert_eq!(h.backend.fetches(), 0);
    h.assert_quiet();

    h.online.send_replace(true);
    h.wait(|s| s.cycles_published == 1).await;
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["n1"]));
    assert_eq!(h.backend.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_going_offline_pauses_polling() {
    let h = Harness::with_interval(
        vec![Poll::items(vec![rec("u1", "one")])],
        Duration::from_secs(60),
    );
    let long = Duration::from_secs(600);

    h.view.start().await.unwrap();
    h.wait_within(long, |s| s.cycles_published == 1).await;

    h.online.send_replace(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.view.status().generation, 1);
    assert_eq!(h.backend.fetches(), 1);

    // Back online: fetch at once, then resume the timer
    h.online.send_replace(true);
    h.wait_within(long, |s| s.cycles_published == 2).await;
    assert_eq!(h.backend.fetches(), 2);
    h.wait_within(long, |s| s.cycles_published == 3).await;
}

#[tokio::test]
async fn test_online_change_ignored_before_start() {
    let h = Harness::offline(vec![Poll::items(vec![rec("u1", "one")])], WAIT);

    h.online.send_replace(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.view.status().state, ViewState::Idle);
    assert_eq!(h.backend.fetches(), 0);
}

#[tokio::test]
async fn test_root_failure_keeps_published() {
    let mut h = Harness::new(vec![
        Poll::items(vec![rec("u1", "one")]),
        Poll::failing(BackendError::Transport("connection reset".to_string())),
    ]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    added(h.next_event().await);

    h.view.refresh().await.unwrap();
    h.wait(|s| s.cycles_abandoned == 1).await;
    h.assert_quiet();

    assert_eq!(ids(&h.view.snapshot().await.unwrap()), set_of(&["u1"]));
    let cached = h.cache.load(&h.key(), &h.bans).await.unwrap().unwrap();
    assert!(cached.contains("u1"));
}

#[tokio::test]
async fn test_secondary_calls_gate_publish() {
    let child_gate = Arc::new(Notify::new());
    let base = rec("u1", "one");
    let mut h = Harness::new(vec![Poll {
        items: vec![base.clone()],
        children: vec![Child {
            items: vec![base.with_property("authoricon", "/tmp/a.png")],
            gate: Some(Arc::clone(&child_gate)),
            error: None,
        }],
        ..Default::default()
    }]);

    h.view.start().await.unwrap();
    let status = h.wait(|s| s.in_flight == 1 && s.generation == 1).await;
    assert_eq!(status.cycles_published, 0);
    h.assert_quiet();

    child_gate.notify_one();
    h.wait(|s| s.cycles_published == 1).await;
    let items = added(h.next_event().await);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get_str("authoricon"), Some("/tmp/a.png"));
}

#[tokio::test]
async fn test_branch_failure_drops_only_that_branch() {
    let mut h = Harness::new(vec![Poll {
        items: vec![rec("u1", "one")],
        children: vec![
            Child {
                items: vec![rec("u2", "two")],
                ..Default::default()
            },
            Child {
                error: Some(BackendError::MalformedResponse("bad xml".to_string())),
                ..Default::default()
            },
        ],
        ..Default::default()
    }]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["u1", "u2"]));
}

#[tokio::test]
async fn test_failed_branch_contributes_nothing_it_submitted() {
    let mut h = Harness::new(vec![Poll {
        items: vec![rec("u1", "one")],
        children: vec![Child {
            items: vec![rec("half", "partial page")],
            error: Some(BackendError::Transport("reset mid-page".to_string())),
            ..Default::default()
        }],
        ..Default::default()
    }]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    assert_eq!(ids(&added(h.next_event().await)), set_of(&["u1"]));
    h.assert_quiet();

    assert_eq!(ids(&h.view.snapshot().await.unwrap()), set_of(&["u1"]));
    let cached = h.cache.load(&h.key(), &h.bans).await.unwrap().unwrap();
    assert!(!cached.contains("half"));
}

#[tokio::test]
async fn test_auth_failure_drops_cache_and_reports_caps() {
    let mut h = Harness::new(vec![Poll::items(vec![rec("u1", "one")])]);
    h.cache
        .save(&h.key(), &DeltaSet::from_records(vec![Arc::new(rec("c1", "cached"))]))
        .await
        .unwrap();
    h.backend.reject_credentials();

    h.view.start().await.unwrap();
    added(h.next_event().await);
    h.wait(|s| s.cycles_abandoned == 1).await;

    assert_eq!(h.backend.fetches(), 0);
    assert!(!h.cache.path_for(&h.key()).exists());
    match h.core_events.try_recv() {
        Ok(CoreEvent::CapabilitiesChanged { service, caps, .. }) => {
            assert_eq!(service, "scripted");
            assert_eq!(caps, vec!["credentials-invalid".to_string()]);
        }
        other => panic!("expected CapabilitiesChanged, got {:?}", other),
    }
    // Cached baseline stays published
    assert_eq!(ids(&h.view.snapshot().await.unwrap()), set_of(&["c1"]));
}

#[tokio::test]
async fn test_recalculate_removes_hidden_item() {
    let mut h = Harness::new(vec![Poll::items(vec![rec("u1", "one"), rec("u2", "two")])]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;
    added(h.next_event().await);

    banned::write(&h.bans).ban("u1").unwrap();
    h.view.recalculate().await;
    assert_eq!(removed(h.next_event().await), set_of(&["u1"]));
    assert_eq!(ids(&h.view.snapshot().await.unwrap()), set_of(&["u2"]));

    let cached = h.cache.load(&h.key(), &h.bans).await.unwrap().unwrap();
    assert!(!cached.contains("u1"));

    // Next poll still includes u1; it stays hidden
    h.view.refresh().await.unwrap();
    h.wait(|s| s.cycles_published == 2).await;
    h.assert_quiet();
}

#[tokio::test]
async fn test_cache_written_after_publish() {
    let h = Harness::new(vec![Poll::items(vec![rec("u1", "one")])]);

    h.view.start().await.unwrap();
    h.wait(|s| s.cycles_published == 1).await;

    let cached = h.cache.load(&h.key(), &h.bans).await.unwrap().unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached.get("u1").unwrap().get_str("title"), Some("one"));
}

#[tokio::test]
async fn test_invalid_transitions_rejected() {
    let h = Harness::new(vec![Poll::items(vec![rec("u1", "one")])]);

    assert!(matches!(
        h.view.stop().await,
        Err(ViewError::InvalidState { state: ViewState::Idle, .. })
    ));
    assert!(matches!(
        h.view.refresh().await,
        Err(ViewError::InvalidState { .. })
    ));

    h.view.start().await.unwrap();
    assert!(matches!(
        h.view.start().await,
        Err(ViewError::InvalidState { state: ViewState::Running, .. })
    ));

    h.view.stop().await.unwrap();
    assert!(matches!(h.view.stop().await, Err(ViewError::InvalidState { .. })));
    // Refresh is allowed while stopped
    h.view.refresh().await.unwrap();

    h.view.close().await.unwrap();
    assert_eq!(h.view.close().await, Err(ViewError::Closed));
    assert_eq!(h.view.start().await, Err(ViewError::Closed));
    assert!(h.view.is_closed());
}

#[tokio::test]
async fn test_mirror_tracks_published_set() {
    let mut h = Harness::new(vec![
        Poll::items(vec![rec("u1", "one"), rec("u2", "two")]),
        Poll::items(vec![rec("u2", "two (edited)"), rec("u3", "three")]),
        Poll::items(vec![rec("u3", "three"), rec("u4", "four")]),
        Poll::items(Vec::new()),
    ]);
    let mut mirror = ClientMirror::new();

    h.view.start().await.unwrap();
    for cycle in 1..=4u64 {
        if cycle > 1 {
            h.view.refresh().await.unwrap();
        }
        h.wait(|s| s.cycles_published == cycle).await;

        while let Ok(event) = h.events.try_recv() {
            mirror.apply(&event);
        }

        let published = h.view.snapshot().await.unwrap();
        assert_eq!(mirror.len(), published.len(), "cycle {}", cycle);
        for record in &published {
            assert_eq!(
                mirror.get(record.identity()).map(|r| r.as_ref()),
                Some(record.as_ref()),
                "cycle {}",
                cycle
            );
        }
    }
    assert!(mirror.is_empty());
}
