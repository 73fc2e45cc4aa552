//! JSON-lines journal file: full reads for the history loader, tail reads
//! for the log monitor.
//!
//! Both share one [`JournalFile`], so the monitor resumes exactly where the
//! last full read stopped and entry ids (1-based line numbers) never repeat.

use logbook_core::{
    ControllerResult, EntrySink, HistoryList, HistoryLoader, JournalEntry, LogMonitor,
    RefreshRequest, TaskContext,
};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
struct Tail {
    path: PathBuf,
    offset: u64,
    lines: u64,
}

/// A journal file and the read position within it.
#[derive(Debug)]
pub struct JournalFile {
    tail: Mutex<Tail>,
}

impl JournalFile {
    /// Creates a reader positioned at the start of `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            tail: Mutex::new(Tail {
                path: path.into(),
                offset: 0,
                lines: 0,
            }),
        }
    }

    /// The journal being read.
    pub fn path(&self) -> PathBuf {
        self.tail.lock().path.clone()
    }

    /// Switches to another journal and rewinds.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let mut tail = self.tail.lock();
        tail.path = path.into();
        tail.offset = 0;
        tail.lines = 0;
    }

    /// Reads every complete line from the start of the file.
    pub fn read_all(&self) -> ControllerResult<Vec<JournalEntry>> {
        let mut tail = self.tail.lock();
        tail.offset = 0;
        tail.lines = 0;
        read_lines(&mut tail)
    }

    /// Reads complete lines appended since the last read.
    pub fn read_new(&self) -> ControllerResult<Vec<JournalEntry>> {
        read_lines(&mut self.tail.lock())
    }
}

fn read_lines(tail: &mut Tail) -> ControllerResult<Vec<JournalEntry>> {
    let mut file = match File::open(&tail.path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    if file.metadata()?.len() < tail.offset {
        tracing::info!(path = %tail.path.display(), "journal truncated, reading from start");
        tail.offset = 0;
        tail.lines = 0;
    }

    file.seek(SeekFrom::Start(tail.offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    // A trailing partial line is left for the next read.
    let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for line in buf[..end].split(|b| *b == b'\n') {
        tail.lines += 1;
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match JournalEntry::from_json_line(text) {
            Ok(mut entry) => {
                entry.id = tail.lines;
                entries.push(entry);
            }
            Err(err) => {
                tracing::warn!(line = tail.lines, %err, "skipping malformed journal line");
            }
        }
    }
    tail.offset += end as u64 + 1;

    Ok(entries)
}

/// Builds histories by reading the whole journal.
pub struct FileHistoryLoader {
    journal: Arc<JournalFile>,
    show_ui_events: bool,
}

impl FileHistoryLoader {
    /// Creates a loader over `journal`.
    pub fn new(journal: Arc<JournalFile>, show_ui_events: bool) -> Self {
        Self {
            journal,
            show_ui_events,
        }
    }
}

impl HistoryLoader for FileHistoryLoader {
    fn load(
        &self,
        _monitor: &dyn LogMonitor,
        ctx: &TaskContext<'_>,
        request: &RefreshRequest,
    ) -> ControllerResult<Option<HistoryList>> {
        if let Some(path) = &request.log_path {
            self.journal.set_path(path.clone());
        }
        ctx.check_closing()?;

        // The file is always read in full, so the reload flags have nothing to skip.
        ctx.progress(0, format!("Reading {}", self.journal.path().display()));
        let entries = self.journal.read_all()?;
        ctx.check_closing()?;

        let show_ui = self.show_ui_events;
        let history = HistoryList::from_entries(
            request.commander_id,
            entries
                .into_iter()
                .filter(|e| e.commander_id == request.commander_id && (show_ui || !e.is_ui_event)),
        );
        ctx.progress(100, format!("{} entries", history.len()));
        Ok(Some(history))
    }
}

struct Poller {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Polls the journal for appended lines on a background thread.
pub struct FileLogMonitor {
    journal: Arc<JournalFile>,
    interval: Duration,
    poller: Mutex<Option<Poller>>,
}

impl FileLogMonitor {
    /// Creates a stopped monitor polling every `interval`.
    pub fn new(journal: Arc<JournalFile>, interval: Duration) -> Self {
        Self {
            journal,
            interval,
            poller: Mutex::new(None),
        }
    }

    /// The journal being watched.
    pub fn path(&self) -> PathBuf {
        self.journal.path()
    }
}

fn poll(journal: &JournalFile, sink: &EntrySink, interval: Duration, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        match journal.read_new() {
            Ok(entries) => {
                for entry in entries {
                    if !sink.submit(entry) {
                        return;
                    }
                }
            }
            Err(err) => tracing::warn!(%err, "journal poll failed"),
        }
        thread::sleep(interval);
    }
}

impl LogMonitor for FileLogMonitor {
    fn start(&self, sink: EntrySink) {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let journal = Arc::clone(&self.journal);
        let interval = self.interval;
        let flag = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("logbook-journal".into())
            .spawn(move || poll(&journal, &sink, interval, &flag));

        match spawned {
            Ok(handle) => {
                tracing::debug!(path = %self.path().display(), "journal monitor started");
                *self.poller.lock() = Some(Poller { stop, handle });
            }
            Err(err) => tracing::error!(%err, "unable to start journal monitor"),
        }
    }

    fn stop(&self) {
        let Some(poller) = self.poller.lock().take() else {
            return;
        };
        poller.stop.store(true, Ordering::SeqCst);
        if poller.handle.join().is_err() {
            tracing::error!("journal monitor panicked");
        }
        tracing::debug!("journal monitor stopped");
    }
}

/// Returns true if `path` looks like a journal this tool can read.
pub fn is_journal(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "jsonl" || ext == "log")
}
