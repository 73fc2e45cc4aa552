//! In-memory collaborators for tests and dry runs.

use crate::coalesce::RefreshRequest;
use crate::collab::{CatalogClient, FollowUp, HistoryLoader, LogMonitor, Persistence, ReferenceLoader};
use crate::error::{ControllerError, ControllerResult};
use crate::history::HistoryList;
use crate::journal::JournalEntry;
use crate::publish::EntrySink;
use crate::report::TaskContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Count(u64),
    Fail,
    Panic,
}

/// A scripted catalog client.
pub struct MockCatalog {
    name: String,
    needs_full: bool,
    full: Outcome,
    incremental: u64,
    last_record: Mutex<Option<SystemTime>>,
    delay: Duration,
    on_full: Option<Box<dyn Fn() + Send + Sync>>,
    full_calls: AtomicUsize,
    incremental_calls: AtomicUsize,
    stopped: AtomicBool,
}

impl MockCatalog {
    /// Creates a catalog whose syncs succeed with zero records.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs_full: false,
            full: Outcome::Count(0),
            incremental: 0,
            last_record: Mutex::new(None),
            delay: Duration::ZERO,
            on_full: None,
            full_calls: AtomicUsize::new(0),
            incremental_calls: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Reports that a full sync is needed at startup.
    pub fn with_needs_full(mut self) -> Self {
        self.needs_full = true;
        self
    }

    /// Full sync succeeds with `count` records.
    pub fn with_full_count(mut self, count: u64) -> Self {
        self.full = Outcome::Count(count);
        self
    }

    /// Incremental sync succeeds with `count` records.
    pub fn with_incremental_count(mut self, count: u64) -> Self {
        self.incremental = count;
        self
    }

    /// Newest local record is from now, so no incremental sync is due.
    pub fn with_fresh_records(self) -> Self {
        *self.last_record.lock() = Some(SystemTime::now());
        self
    }

    /// Full sync returns an error.
    pub fn failing(mut self) -> Self {
        self.full = Outcome::Fail;
        self
    }

    /// Full sync panics.
    pub fn panicking(mut self) -> Self {
        self.full = Outcome::Panic;
        self
    }

    /// Full sync takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Runs `f` at the start of every full sync.
    pub fn on_full_sync(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_full = Some(Box::new(f));
        self
    }

    /// Number of full syncs started.
    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }

    /// Number of incremental syncs started.
    pub fn incremental_calls(&self) -> usize {
        self.incremental_calls.load(Ordering::SeqCst)
    }

    /// Whether `stop` was called.
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CatalogClient for MockCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_full_sync(&self) -> bool {
        self.needs_full
    }

    fn last_record_time(&self) -> Option<SystemTime> {
        *self.last_record.lock()
    }

    fn full_sync(&self, _grids: &[u32], ctx: &TaskContext<'_>) -> ControllerResult<u64> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = &self.on_full {
            f();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        ctx.progress(100, format!("{} downloaded", self.name));

        match self.full {
            Outcome::Count(count) => {
                *self.last_record.lock() = Some(SystemTime::now());
                Ok(count)
            }
            Outcome::Fail => Err(ControllerError::collaborator(&self.name, "download failed")),
            Outcome::Panic => panic!("{} exploded", self.name),
        }
    }

    fn incremental_sync(&self, _grids: &[u32], _ctx: &TaskContext<'_>) -> ControllerResult<u64> {
        self.incremental_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_record.lock() = Some(SystemTime::now());
        Ok(self.incremental)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Settings held in a map; index rebuilds are only counted.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    settings: Mutex<HashMap<String, String>>,
    index_rebuilds: AtomicUsize,
}

impl MemoryPersistence {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of index rebuilds so far.
    pub fn index_rebuilds(&self) -> usize {
        self.index_rebuilds.load(Ordering::SeqCst)
    }
}

impl Persistence for MemoryPersistence {
    fn rebuild_indexes(&self) -> ControllerResult<()> {
        self.index_rebuilds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Option<String> {
        self.settings.lock().get(key).cloned()
    }

    fn put_setting(&self, key: &str, value: &str) -> ControllerResult<()> {
        self.settings.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Loads histories from a fixed set of entries, recording every request.
#[derive(Default)]
pub struct MockHistoryLoader {
    entries: Mutex<Vec<JournalEntry>>,
    requests: Mutex<Vec<RefreshRequest>>,
    delay: Duration,
    fail: AtomicBool,
    panic: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockHistoryLoader {
    /// Creates a loader with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every load takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Entries returned by future loads, filtered by commander.
    pub fn set_entries(&self, entries: Vec<JournalEntry>) {
        *self.entries.lock() = entries;
    }

    /// Makes future loads fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes future loads panic.
    pub fn set_panicking(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<RefreshRequest> {
        self.requests.lock().clone()
    }

    /// Highest number of loads observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl HistoryLoader for MockHistoryLoader {
    fn load(
        &self,
        _monitor: &dyn LogMonitor,
        ctx: &TaskContext<'_>,
        request: &RefreshRequest,
    ) -> ControllerResult<Option<HistoryList>> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(ControllerError::collaborator("history", "journal unreadable"))
        } else if ctx.is_closing() {
            Err(ControllerError::Cancelled)
        } else {
            let entries = self.entries.lock().clone();
            Ok(Some(HistoryList::from_entries(
                request.commander_id,
                entries
                    .into_iter()
                    .filter(|e| e.commander_id == request.commander_id),
            )))
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.panic.load(Ordering::SeqCst) {
            panic!("history loader panicked");
        }
        result
    }
}

/// A log monitor driven by hand.
#[derive(Default)]
pub struct ManualLogMonitor {
    sink: Mutex<Option<EntrySink>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    next_id: AtomicU64,
}

impl ManualLogMonitor {
    /// Creates a stopped monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an entry if the monitor is running, assigning its arrival id.
    /// Returns false if it was dropped.
    pub fn push(&self, mut entry: JournalEntry) -> bool {
        entry.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        match self.sink.lock().as_ref() {
            Some(sink) => sink.submit(entry),
            None => false,
        }
    }

    /// Whether the monitor is currently delivering.
    pub fn is_running(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Number of starts so far.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of stops so far.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl LogMonitor for ManualLogMonitor {
    fn start(&self, sink: EntrySink) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = Some(sink);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = None;
    }
}

/// Records follow-up starts and stops.
#[derive(Debug, Default)]
pub struct RecordingFollowUp {
    started: Mutex<Vec<i64>>,
    stops: AtomicUsize,
}

impl RecordingFollowUp {
    /// Creates an idle follow-up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commanders started so far.
    pub fn started(&self) -> Vec<i64> {
        self.started.lock().clone()
    }

    /// Number of stops so far.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl FollowUp for RecordingFollowUp {
    fn start(&self, commander_id: i64) {
        self.started.lock().push(commander_id);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A reference loader that counts its calls.
#[derive(Debug)]
pub struct CountingReferenceLoader {
    name: String,
    downloads: bool,
    download_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl CountingReferenceLoader {
    /// Creates a loader; `downloads` enables the periodic download step.
    pub fn new(name: impl Into<String>, downloads: bool) -> Self {
        Self {
            name: name.into(),
            downloads,
            download_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
        }
    }

    /// Number of downloads so far.
    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Number of loads so far.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

impl ReferenceLoader for CountingReferenceLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn downloads(&self) -> bool {
        self.downloads
    }

    fn download(&self, _ctx: &TaskContext<'_>) -> ControllerResult<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, _ctx: &TaskContext<'_>) -> ControllerResult<()> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
