//! End-to-end tests driving a controller through in-memory collaborators.

use logbook_core::mock::{
    CountingReferenceLoader, ManualLogMonitor, MemoryPersistence, MockCatalog, MockHistoryLoader,
    RecordingFollowUp,
};
use logbook_core::{
    Collaborators, Controller, ControllerConfig, ControllerEvent, FollowUp, JournalEntry,
    LifecycleState, Persistence, RefreshRequest, CURRENT_COMMANDER_KEY,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    controller: Controller,
    events: Receiver<ControllerEvent>,
    monitor: Arc<ManualLogMonitor>,
    loader: Arc<MockHistoryLoader>,
    catalog_a: Arc<MockCatalog>,
    catalog_b: Arc<MockCatalog>,
    persistence: Arc<MemoryPersistence>,
    follow_up: Arc<RecordingFollowUp>,
}

struct Setup {
    config: ControllerConfig,
    loader: MockHistoryLoader,
    catalog_a: MockCatalog,
    catalog_b: MockCatalog,
    persistence: MemoryPersistence,
    reference: Vec<Arc<CountingReferenceLoader>>,
}

impl Setup {
    fn new() -> Self {
        Self {
            config: ControllerConfig::new().with_sync_enabled(false),
            loader: MockHistoryLoader::new(),
            catalog_a: MockCatalog::new("catalog-a").with_fresh_records(),
            catalog_b: MockCatalog::new("catalog-b"),
            persistence: MemoryPersistence::new(),
            reference: Vec::new(),
        }
    }

    /// Builds and starts the controller, then runs the host's startup calls.
    fn start(self) -> Harness {
        let h = self.build();
        h.controller.begin_initial_load();
        h.controller.mark_init_complete();
        h
    }

    /// Builds and starts the controller without signalling host readiness.
    fn build(self) -> Harness {
        let monitor = Arc::new(ManualLogMonitor::new());
        let loader = Arc::new(self.loader);
        let catalog_a = Arc::new(self.catalog_a);
        let catalog_b = Arc::new(self.catalog_b);
        let persistence = Arc::new(self.persistence);
        let follow_up = Arc::new(RecordingFollowUp::new());

        let mut collab = Collaborators::new(
            monitor.clone(),
            loader.clone(),
            catalog_a.clone(),
            catalog_b.clone(),
            persistence.clone(),
        )
        .with_follow_up(follow_up.clone());
        for reference in self.reference {
            collab = collab.with_reference_loader(reference);
        }

        let controller = Controller::new(self.config, collab);
        let events = controller.subscribe();
        controller.start().unwrap();

        Harness {
            controller,
            events,
            monitor,
            loader,
            catalog_a,
            catalog_b,
            persistence,
            follow_up,
        }
    }
}

impl Harness {
    /// Collects events up to and including the first one matching `pred`.
    fn until(&self, pred: impl FnMut(&ControllerEvent) -> bool) -> Vec<ControllerEvent> {
        collect_until(&self.events, pred)
    }

    fn until_initialised(&self) -> Vec<ControllerEvent> {
        self.until(|e| matches!(e, ControllerEvent::InitialisationComplete))
    }

    fn close(&self) -> Vec<ControllerEvent> {
        self.controller.shutdown();
        let seen = self.until(|e| matches!(e, ControllerEvent::FinalClose));
        self.controller.join().unwrap();
        seen
    }
}

fn collect_until(
    events: &Receiver<ControllerEvent>,
    mut pred: impl FnMut(&ControllerEvent) -> bool,
) -> Vec<ControllerEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(left)
            .unwrap_or_else(|_| panic!("timed out; saw {seen:?}"));
        let hit = pred(&event);
        seen.push(event);
        if hit {
            return seen;
        }
    }
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn position(events: &[ControllerEvent], pred: impl Fn(&ControllerEvent) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("event missing from {events:?}"))
}

fn commanders(requests: &[RefreshRequest]) -> Vec<i64> {
    requests.iter().map(|r| r.commander_id).collect()
}

#[test]
fn startup_publishes_history_in_order() {
    let setup = Setup::new();
    setup.loader.set_entries(vec![
        JournalEntry::new(1, "FSDJump", 0),
        JournalEntry::new(2, "Docked", 0),
        JournalEntry::new(3, "FSDJump", 1),
    ]);
    let h = setup.start();

    let events = h.until_initialised();

    let initial_sync = position(&events, |e| matches!(e, ControllerEvent::InitialSyncComplete));
    let changed = position(&events, |e| matches!(e, ControllerEvent::HistoryChanged(_)));
    let complete = position(&events, |e| matches!(e, ControllerEvent::RefreshComplete));
    let initialised = events.len() - 1;
    assert!(initial_sync < changed);
    assert!(changed < complete);
    assert!(complete < initialised);

    let history = h.controller.history().unwrap();
    assert_eq!(history.commander_id, 0);
    assert_eq!(history.len(), 2);
    assert_eq!(h.monitor.starts(), 1);
    assert!(h.monitor.is_running());
    assert_eq!(h.follow_up.started(), vec![0]);
    assert_eq!(h.persistence.index_rebuilds(), 1);
    wait_until("running", || h.controller.lifecycle() == LifecycleState::Running);

    h.close();
}

#[test]
fn startup_uses_saved_commander() {
    let setup = Setup::new();
    setup
        .persistence
        .put_setting(CURRENT_COMMANDER_KEY, "4")
        .unwrap();
    let h = setup.start();

    h.until_initialised();

    assert_eq!(commanders(&h.loader.requests()), vec![4]);
    assert_eq!(h.controller.current_commander(), 4);
    h.close();
}

#[test]
fn refresh_requests_are_coalesced() {
    let mut setup = Setup::new();
    setup.loader = MockHistoryLoader::new().with_delay(Duration::from_millis(200));
    let h = setup.start();
    h.until_initialised();
    wait_until("initial refresh handback", || !h.controller.is_refresh_in_flight());

    let r1 = RefreshRequest::for_commander(1);
    assert!(h.controller.request_refresh(r1.clone()));
    h.until(|e| matches!(e, ControllerEvent::RefreshStarting));

    // R1 is loading now.
    assert!(!h.controller.request_refresh(r1), "identical request dropped");
    assert!(h.controller.request_refresh(RefreshRequest::for_commander(2)));
    assert!(h.controller.request_refresh(RefreshRequest::for_commander(3)));

    let mut completions = 0;
    h.until(|e| {
        if matches!(e, ControllerEvent::RefreshComplete) {
            completions += 1;
        }
        completions == 2
    });
    wait_until("refresh guard released", || !h.controller.is_refresh_in_flight());

    assert_eq!(commanders(&h.loader.requests()), vec![0, 1, 3]);
    assert_eq!(h.loader.max_concurrent(), 1);
    assert_eq!(h.controller.current_commander(), 3);
    assert_eq!(h.follow_up.started(), vec![0, 1, 3]);

    h.close();
}

#[test]
fn loader_failure_still_completes_refresh() {
    let setup = Setup::new();
    setup.loader.set_failing(true);
    let h = setup.start();

    h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    wait_until("refresh guard released", || !h.controller.is_refresh_in_flight());

    let log = h.controller.log_text().unwrap();
    assert!(log.contains("History refresh error"), "log was {log:?}");
    assert_eq!(h.monitor.starts(), 1, "monitor restarted after failure");

    h.loader.set_failing(false);
    assert!(h.controller.request_refresh_current());
    h.until(|e| matches!(e, ControllerEvent::HistoryChanged(_)));

    h.close();
}

#[test]
fn sync_requested_during_sync_is_dropped() {
    let mut setup = Setup::new();
    setup.config = ControllerConfig::new();
    setup.catalog_a = MockCatalog::new("catalog-a")
        .with_fresh_records()
        .with_full_count(4)
        .with_delay(Duration::from_millis(200));
    let h = setup.start();

    h.until(|e| matches!(e, ControllerEvent::SyncComplete));
    assert!(!h.controller.is_sync_in_flight());

    assert!(h.controller.request_sync(true, false));
    assert!(h.controller.is_sync_in_flight());
    assert!(!h.controller.request_sync(false, true));

    let events = h.until(|e| matches!(e, ControllerEvent::SyncComplete));
    let starting = position(&events, |e| matches!(e, ControllerEvent::SyncStarting));
    assert!(starting < events.len() - 1);
    assert_eq!(h.catalog_a.full_calls(), 1);
    assert_eq!(h.catalog_b.full_calls(), 0);
    assert!(!h.controller.sync_state().need_full_b);

    // Changed catalog data triggers a reload of the current commander.
    h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    let log = h.controller.log_text().unwrap();
    assert!(log.contains("Refresh due to updated catalog data"));
    assert!(log.contains("Catalog A update complete with 4 records"));
    assert_eq!(h.controller.sync_state().full_a_count, 0);

    h.close();
}

#[test]
fn close_between_catalogs_skips_the_rest() {
    let (started_tx, started_rx) = mpsc::channel();
    let mut setup = Setup::new();
    setup.config = ControllerConfig::new();
    setup.catalog_a = MockCatalog::new("catalog-a")
        .with_needs_full()
        .with_full_count(2)
        .with_delay(Duration::from_millis(200))
        .on_full_sync(move || {
            let _ = started_tx.send(());
        });
    setup.catalog_b = MockCatalog::new("catalog-b").with_needs_full();
    let h = setup.start();

    started_rx.recv_timeout(WAIT).unwrap();
    let events = h.close();

    assert_eq!(h.catalog_a.full_calls(), 1);
    assert_eq!(h.catalog_b.full_calls(), 0);
    assert!(h.catalog_a.was_stopped());
    assert!(h.catalog_b.was_stopped());
    assert!(!events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SyncComplete)));
    assert_eq!(h.controller.lifecycle(), LifecycleState::FinalClosed);
}

#[test]
fn shutdown_is_idempotent() {
    let h = Setup::new().start();
    h.until_initialised();

    let hook_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hook_runs);
    h.controller.on_background_safe_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| h.controller.shutdown());
        }
    });
    let events = h.until(|e| matches!(e, ControllerEvent::FinalClose));
    h.controller.join().unwrap();
    h.controller.shutdown();

    let safe = position(&events, |e| matches!(e, ControllerEvent::BackgroundSafeClose));
    assert!(safe < events.len() - 1);
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    assert!(!h.monitor.is_running());
    assert!(h.events.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(!h.controller.request_refresh(RefreshRequest::for_commander(9)));
    assert!(!h.monitor.push(JournalEntry::new(0, "FSDJump", 0)));
}

#[test]
fn journal_bursts_are_merged() {
    let h = Setup::new().start();
    h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    wait_until("monitor running", || h.monitor.is_running());

    for _ in 0..3 {
        assert!(h.monitor.push(JournalEntry::new(0, "UnderAttack", 0)));
    }
    assert!(h.monitor.push(JournalEntry::new(0, "Scan", 0)));

    let mut delivered = Vec::new();
    h.until(|e| {
        if let ControllerEvent::NewJournalEntry(entry) = e {
            delivered.push(entry.clone());
        }
        delivered.len() == 2
    });
    assert_eq!(delivered[0].kind, "UnderAttack");
    assert_eq!(delivered[0].repeat, 2);
    assert_eq!(delivered[0].id, 1);
    assert_eq!(delivered[1].kind, "Scan");

    // A lone delayed entry is delivered when its timer fires.
    assert!(h.monitor.push(JournalEntry::new(0, "ShipTargeted", 0)));
    h.until(|e| matches!(e, ControllerEvent::NewHistoryEntry(he) if he.entry.kind == "ShipTargeted"));

    let history = h.controller.history().unwrap();
    let kinds: Vec<_> = history.entries().iter().map(|he| he.entry.kind.as_str()).collect();
    assert_eq!(kinds, vec!["UnderAttack", "Scan", "ShipTargeted"]);

    h.close();
}

#[test]
fn ui_events_are_announced_but_hidden() {
    let h = Setup::new().start();
    h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    wait_until("monitor running", || h.monitor.is_running());

    assert!(h.monitor.push(JournalEntry::new(0, "Music", 0).ui_event("Exploration")));
    let events = h.until(|e| matches!(e, ControllerEvent::NewJournalEntry(_)));

    assert!(events.iter().any(|e| matches!(
        e,
        ControllerEvent::NewUiEvent { text, shown: false } if text == "Exploration"
    )));
    assert!(h.controller.history().unwrap().is_empty());

    h.close();
}

#[test]
fn reference_data_downloads_only_when_stale() {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let fresh = Arc::new(CountingReferenceLoader::new("fresh", true));
    let stale = Arc::new(CountingReferenceLoader::new("stale", true));
    let local = Arc::new(CountingReferenceLoader::new("local", false));

    let mut setup = Setup::new();
    setup
        .persistence
        .put_setting("fresh.last_download", &now.to_string())
        .unwrap();
    setup.reference = vec![fresh.clone(), stale.clone(), local.clone()];
    let h = setup.start();

    h.until(|e| matches!(e, ControllerEvent::InitialSyncComplete));

    assert_eq!(fresh.download_calls(), 0);
    assert_eq!(stale.download_calls(), 1);
    assert_eq!(local.download_calls(), 0);
    assert_eq!(
        (fresh.load_calls(), stale.load_calls(), local.load_calls()),
        (1, 1, 1)
    );
    assert!(h.persistence.get_setting("stale.last_download").is_some());

    h.close();
}

#[test]
fn early_refresh_request_is_served_by_refresh_worker() {
    let setup = Setup::new();
    setup
        .loader
        .set_entries(vec![JournalEntry::new(1, "FSDJump", 5)]);
    let h = setup.build();

    // Claims the guard before the init worker's first reload.
    assert!(h.controller.request_refresh(RefreshRequest::for_commander(5)));
    h.controller.begin_initial_load();
    h.controller.mark_init_complete();

    let events = h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::RefreshStarting)));
    wait_until("refresh guard released", || !h.controller.is_refresh_in_flight());

    assert_eq!(commanders(&h.loader.requests()), vec![5]);
    assert_eq!(h.controller.current_commander(), 5);
    assert_eq!(h.controller.history().unwrap().len(), 1);
    assert!(h.monitor.is_running());

    h.close();
}

#[test]
fn panicking_loader_leaves_refresh_worker_serving() {
    let setup = Setup::new();
    setup
        .loader
        .set_entries(vec![JournalEntry::new(1, "FSDJump", 2)]);
    let h = setup.start();
    h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    wait_until("initial refresh handback", || !h.controller.is_refresh_in_flight());

    h.loader.set_panicking(true);
    assert!(h.controller.request_refresh(RefreshRequest::for_commander(1)));
    let events = h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    wait_until("refresh guard released", || !h.controller.is_refresh_in_flight());

    assert!(!events
        .iter()
        .any(|e| matches!(e, ControllerEvent::HistoryChanged(_))));
    assert_eq!(h.controller.current_commander(), 0);
    let log = h.controller.log_text().unwrap();
    assert!(log.contains("History refresh error: panic in history loader"), "log was {log:?}");

    h.loader.set_panicking(false);
    assert!(h.controller.request_refresh(RefreshRequest::for_commander(2)));
    let events = h.until(|e| matches!(e, ControllerEvent::HistoryChanged(_)));
    match events.last() {
        Some(ControllerEvent::HistoryChanged(history)) => {
            assert_eq!(history.commander_id, 2);
            assert_eq!(history.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }

    h.close();
}

#[test]
fn merge_timer_fires_while_publish_context_is_busy() {
    let h = Setup::new().start();
    h.until(|e| matches!(e, ControllerEvent::RefreshComplete));
    wait_until("monitor running", || h.monitor.is_running());

    let reporter = h.controller.reporter();
    let stop = Arc::new(AtomicBool::new(false));
    let started = Instant::now();
    assert!(h.monitor.push(JournalEntry::new(0, "ShipTargeted", 0)));

    // Keeps the publish channel non-empty, stamping each post with its age.
    let flood = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) && started.elapsed() < Duration::from_millis(1500) {
                reporter.progress(0, started.elapsed().as_millis().to_string());
            }
        })
    };

    // Age of the last post handled before the entry was delivered.
    let deadline = Instant::now() + WAIT;
    let mut delivered_after = 0u128;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match h.events.recv_timeout(left).expect("entry not delivered") {
            ControllerEvent::Progress { message, .. } => {
                if let Ok(ms) = message.parse() {
                    delivered_after = ms;
                }
            }
            ControllerEvent::NewHistoryEntry(he) if he.entry.kind == "ShipTargeted" => break,
            _ => {}
        }
    }
    stop.store(true, Ordering::SeqCst);
    flood.join().unwrap();

    assert!(delivered_after < 1000, "delivered after {delivered_after}ms");

    h.close();
}

/// A follow-up whose first stop stalls, holding up the refresh handback.
struct StallingFollowUp {
    entered: Sender<()>,
    stalled: AtomicBool,
    starts: AtomicUsize,
}

impl FollowUp for StallingFollowUp {
    fn start(&self, _commander_id: i64) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            let _ = self.entered.send(());
            thread::sleep(Duration::from_millis(300));
        }
    }
}

#[test]
fn shutdown_during_refresh_handback_keeps_producers_stopped() {
    let (entered, entered_rx) = mpsc::channel();
    let follow_up = Arc::new(StallingFollowUp {
        entered,
        stalled: AtomicBool::new(false),
        starts: AtomicUsize::new(0),
    });
    let monitor = Arc::new(ManualLogMonitor::new());
    let collab = Collaborators::new(
        monitor.clone(),
        Arc::new(MockHistoryLoader::new()),
        Arc::new(MockCatalog::new("catalog-a")),
        Arc::new(MockCatalog::new("catalog-b")),
        Arc::new(MemoryPersistence::new()),
    )
    .with_follow_up(follow_up.clone());

    let controller = Controller::new(ControllerConfig::new().with_sync_enabled(false), collab);
    let events = controller.subscribe();
    controller.start().unwrap();
    controller.begin_initial_load();
    controller.mark_init_complete();

    // The startup handback is now stalled inside the follow-up's stop.
    entered_rx.recv_timeout(WAIT).unwrap();
    controller.shutdown();
    collect_until(&events, |e| matches!(e, ControllerEvent::FinalClose));
    controller.join().unwrap();

    assert_eq!(controller.lifecycle(), LifecycleState::FinalClosed);
    assert!(!monitor.is_running());
    assert_eq!(monitor.starts(), 0);
    assert_eq!(follow_up.starts.load(Ordering::SeqCst), 0);
}
