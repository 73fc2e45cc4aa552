//! The controller: lifecycle owner and the single entry point for callers.

use crate::coalesce::{RefreshRequest, RequestCoalescer};
use crate::collab::Collaborators;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::events::{ControllerEvent, EventFeed};
use crate::history::HistoryList;
use crate::init::InitWorker;
use crate::journal::JournalEntry;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::merge::{JournalMerger, KindMergePolicy, MergePolicy};
use crate::publish::{self, EntrySink, Message, PublishState, Publisher};
use crate::report::Reporter;
use crate::signal::{Signal, Signals};
use crate::sync::SyncState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Settings key holding the commander loaded at startup.
pub const CURRENT_COMMANDER_KEY: &str = "current_commander";

/// State shared between the controller handle and its threads.
pub(crate) struct Shared {
    pub(crate) config: ControllerConfig,
    pub(crate) collab: Collaborators,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) signals: Signals,
    pub(crate) refresh: RequestCoalescer,
    pub(crate) sync_in_flight: AtomicBool,
    pub(crate) sync_state: Mutex<SyncState>,
    pub(crate) current_commander: AtomicI64,
    pub(crate) events: EventFeed,
    pub(crate) publisher: Publisher,
    pub(crate) reporter: Reporter,
    pub(crate) safe_close_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Shared {
    pub(crate) fn request_refresh(&self, request: RefreshRequest) -> bool {
        if self.lifecycle.is_closing() {
            return false;
        }
        if self.refresh.offer(request) {
            self.signals.set(Signal::RefreshRequested);
            true
        } else {
            false
        }
    }

    pub(crate) fn request_refresh_current(&self) -> bool {
        self.request_refresh(RefreshRequest::for_commander(self.current_commander()))
    }

    pub(crate) fn claim_sync(&self) -> bool {
        self.sync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release_sync(&self) {
        self.sync_in_flight.store(false, Ordering::SeqCst);
    }

    pub(crate) fn current_commander(&self) -> i64 {
        self.current_commander.load(Ordering::SeqCst)
    }

    pub(crate) fn set_current_commander(&self, commander_id: i64) {
        self.current_commander.store(commander_id, Ordering::SeqCst);
    }
}

/// Work that only exists between construction and [`Controller::start`].
struct Pending {
    rx: Receiver<Message>,
    merge_policy: Box<dyn MergePolicy>,
}

/// Coordinates history reloads, journal merging, catalog sync and shutdown.
///
/// # Usage
///
/// ```rust,ignore
/// let controller = Controller::new(ControllerConfig::default(), collaborators);
/// let events = controller.subscribe();
/// controller.start()?;
/// controller.begin_initial_load();
/// controller.mark_init_complete();
///
/// // ... later, from any thread
/// controller.request_refresh(RefreshRequest::for_commander(2));
/// controller.request_sync(true, false);
///
/// controller.shutdown();
/// controller.join()?;
/// ```
pub struct Controller {
    shared: Arc<Shared>,
    pending: Mutex<Option<Pending>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Creates a controller. No threads run until [`Controller::start`].
    pub fn new(config: ControllerConfig, mut collab: Collaborators) -> Self {
        let merge_policy = collab
            .merge_policy
            .take()
            .unwrap_or_else(|| Box::new(KindMergePolicy::new(config.merge_delays.clone())));
        let (publisher, rx) = Publisher::channel();

        let shared = Arc::new(Shared {
            config,
            collab,
            lifecycle: Lifecycle::new(),
            signals: Signals::new(),
            refresh: RequestCoalescer::new(),
            sync_in_flight: AtomicBool::new(false),
            sync_state: Mutex::new(SyncState::default()),
            current_commander: AtomicI64::new(-1),
            events: EventFeed::new(),
            reporter: Reporter::new(publisher.clone()),
            publisher,
            safe_close_hooks: Mutex::new(Vec::new()),
        });

        Self {
            shared,
            pending: Mutex::new(Some(Pending { rx, merge_policy })),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Starts the publish context and the init worker.
    ///
    /// The init worker then waits for [`Controller::begin_initial_load`].
    /// Calling this more than once, or after shutdown, does nothing.
    pub fn start(&self) -> ControllerResult<()> {
        let Some(pending) = self.pending.lock().take() else {
            return Ok(());
        };
        if !self.shared.lifecycle.advance(LifecycleState::Initializing) {
            // A concurrent shutdown found nothing pending, so close here.
            self.close_unstarted();
            return Ok(());
        }

        let state = PublishState::new(
            Arc::clone(&self.shared),
            JournalMerger::new(pending.merge_policy),
        );
        let rx = pending.rx;
        let publish = thread::Builder::new()
            .name("logbook-publish".into())
            .spawn(move || publish::run(rx, state))?;
        self.threads.lock().push(publish);

        match InitWorker::spawn(Arc::clone(&self.shared)) {
            Ok(init) => {
                self.threads.lock().push(init);
                tracing::info!("controller started");
                Ok(())
            }
            Err(err) => {
                self.shared.stop_publisher();
                Err(ControllerError::Io(err))
            }
        }
    }

    /// Signals that the host is ready for the initial load.
    pub fn begin_initial_load(&self) {
        self.shared.signals.set(Signal::ReadyForInitialLoad);
    }

    /// Signals that the host finished its own initialisation. History
    /// results are held back until this is called.
    pub fn mark_init_complete(&self) {
        self.shared.signals.set(Signal::InitComplete);
    }

    /// Requests a history reload.
    ///
    /// Returns true if the request was queued and the refresh worker
    /// signalled. Identical requests made while a refresh is in flight are
    /// dropped; differing ones are coalesced so only the last runs.
    pub fn request_refresh(&self, request: RefreshRequest) -> bool {
        self.shared.request_refresh(request)
    }

    /// Requests a plain reload of the current commander.
    pub fn request_refresh_current(&self) -> bool {
        self.shared.request_refresh_current()
    }

    /// Requests a catalog sync.
    ///
    /// Returns false if sync is disabled or a sync is already in flight. In
    /// the latter case the requested catalogs are not added to the running
    /// cycle; the caller has to ask again later.
    pub fn request_sync(&self, want_a: bool, want_b: bool) -> bool {
        let shared = &self.shared;
        if !shared.config.sync_enabled || shared.lifecycle.is_closing() || !shared.claim_sync() {
            return false;
        }

        {
            let mut state = shared.sync_state.lock();
            state.need_full_a |= want_a;
            state.need_full_b |= want_b;
        }
        let _ = shared
            .publisher
            .post(|ctx| ctx.emit(ControllerEvent::SyncStarting));
        shared.signals.set(Signal::ResyncRequested);
        true
    }

    /// Requests shutdown and returns immediately.
    ///
    /// Producers are stopped and workers are told to exit; completion is
    /// reported by [`ControllerEvent::FinalClose`]. Further calls do nothing.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.lifecycle.advance(LifecycleState::ClosingRequested) {
            return;
        }

        shared.collab.catalog_a.stop();
        shared.collab.catalog_b.stop();
        if let Some(follow_up) = &shared.collab.follow_up {
            follow_up.stop();
        }
        shared.collab.monitor.stop();

        shared.reporter.log_highlight("Closing down, please wait..");
        shared.signals.set(Signal::Close);
        let _ = shared.publisher.post(|ctx| ctx.disarm_merge_timer());

        // Never started: nothing will run the final-close sequence.
        if self.pending.lock().take().is_some() {
            self.close_unstarted();
        }
    }

    fn close_unstarted(&self) {
        self.shared.events.emit(ControllerEvent::FinalClose);
        self.shared.lifecycle.advance(LifecycleState::FinalClosed);
    }

    /// Waits for the controller's threads to exit. Call after [`Controller::shutdown`].
    pub fn join(&self) -> ControllerResult<()> {
        let handles = std::mem::take(&mut *self.threads.lock());
        let mut result = Ok(());
        for handle in handles {
            if handle.join().is_err() {
                result = Err(ControllerError::Panicked("controller thread".into()));
            }
        }
        result
    }

    /// Submits a journal entry as if the log monitor had produced it.
    pub fn submit_entry(&self, entry: JournalEntry) -> bool {
        self.entry_sink().submit(entry)
    }

    /// A sink delivering entries to this controller.
    pub fn entry_sink(&self) -> EntrySink {
        EntrySink::new(self.shared.publisher.clone())
    }

    /// Subscribes to notifications.
    pub fn subscribe(&self) -> Receiver<ControllerEvent> {
        self.shared.events.subscribe()
    }

    /// Registers a hook run on the init worker after all background work
    /// has stopped and before the final close.
    pub fn on_background_safe_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.shared.safe_close_hooks.lock().push(Box::new(hook));
    }

    /// The published history snapshot.
    pub fn history(&self) -> ControllerResult<Arc<HistoryList>> {
        self.shared.publisher.query(|ctx| ctx.history())
    }

    /// Everything written to the log sink so far.
    pub fn log_text(&self) -> ControllerResult<String> {
        self.shared.publisher.query(|ctx| ctx.log_text())
    }

    /// Re-announces the current history with a `HistoryChanged` event.
    pub fn refresh_displays(&self) -> ControllerResult<()> {
        self.shared.publisher.post(|ctx| ctx.refresh_displays())
    }

    /// The log sink and progress reporter.
    pub fn reporter(&self) -> Reporter {
        self.shared.reporter.clone()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle.get()
    }

    /// Returns true while a refresh is running or queued.
    pub fn is_refresh_in_flight(&self) -> bool {
        self.shared.refresh.is_in_flight()
    }

    /// Returns true while a sync is running.
    pub fn is_sync_in_flight(&self) -> bool {
        self.shared.sync_in_flight.load(Ordering::SeqCst)
    }

    /// A copy of the sync state.
    pub fn sync_state(&self) -> SyncState {
        *self.shared.sync_state.lock()
    }

    /// Commander of the published history, or -1 before the first load.
    pub fn current_commander(&self) -> i64 {
        self.shared.current_commander()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
