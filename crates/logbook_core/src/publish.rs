//! The publish context.
//!
//! A single thread owns every piece of state that notifications are built
//! from: the published history snapshot, the merge queue and the accumulated
//! log text. Other threads never touch that state; they post tasks to the
//! context's channel and, where they need an answer, wait on a reply channel.
//!
//! The merge timer lives here too. The loop waits on the channel only until
//! the merger's deadline and checks for expiry before every receive, so timer
//! expiry is handled on the same thread as every submit and flush.

use crate::controller::Shared;
use crate::error::{ControllerError, ControllerResult};
use crate::events::{ControllerEvent, Severity};
use crate::history::HistoryList;
use crate::journal::JournalEntry;
use crate::lifecycle::LifecycleState;
use crate::merge::JournalMerger;
use crate::signal::Signal;
use crate::sync::SyncState;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Instant;

type Task = Box<dyn FnOnce(&mut PublishState) + Send>;

pub(crate) enum Message {
    Task(Task),
    Entry(JournalEntry),
    Stop,
}

/// Handle for posting work to the publish context.
#[derive(Clone)]
pub(crate) struct Publisher {
    tx: Sender<Message>,
}

impl Publisher {
    pub(crate) fn channel() -> (Self, Receiver<Message>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Runs `task` on the publish context, after everything posted before it.
    pub(crate) fn post<F>(&self, task: F) -> ControllerResult<()>
    where
        F: FnOnce(&mut PublishState) + Send + 'static,
    {
        self.tx
            .send(Message::Task(Box::new(task)))
            .map_err(|_| ControllerError::ContextClosed)
    }

    /// Runs `query` on the publish context and waits for its answer.
    ///
    /// Must not be called from the publish context itself.
    pub(crate) fn query<R, F>(&self, query: F) -> ControllerResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut PublishState) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.post(move |ctx| {
            let _ = reply_tx.send(query(ctx));
        })?;
        reply_rx.recv().map_err(|_| ControllerError::ContextClosed)
    }

    fn submit(&self, entry: JournalEntry) -> ControllerResult<()> {
        self.tx
            .send(Message::Entry(entry))
            .map_err(|_| ControllerError::ContextClosed)
    }

    fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }
}

/// Where the log monitor (or anything else) delivers new journal entries.
///
/// Entries may be submitted from any thread; they are funneled to the publish
/// context and merged there in arrival order.
#[derive(Clone)]
pub struct EntrySink {
    publisher: Publisher,
}

impl EntrySink {
    pub(crate) fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    /// Submits an entry. Returns false if the controller has shut down.
    pub fn submit(&self, entry: JournalEntry) -> bool {
        self.publisher.submit(entry).is_ok()
    }
}

/// State owned by the publish thread.
pub(crate) struct PublishState {
    shared: Arc<Shared>,
    merger: JournalMerger,
    history: Arc<HistoryList>,
    log_text: String,
    refreshed_hooks: Vec<Task>,
    stopping: bool,
}

impl PublishState {
    pub(crate) fn new(shared: Arc<Shared>, merger: JournalMerger) -> Self {
        Self {
            shared,
            merger,
            history: Arc::new(HistoryList::default()),
            log_text: String::new(),
            refreshed_hooks: Vec::new(),
            stopping: false,
        }
    }

    pub(crate) fn emit(&self, event: ControllerEvent) {
        self.shared.events.emit(event);
    }

    pub(crate) fn append_log(&mut self, text: String, severity: Severity) {
        self.log_text.push_str(&text);
        self.log_text.push('\n');
        self.emit(ControllerEvent::NewLogEntry { text, severity });
    }

    pub(crate) fn history(&self) -> Arc<HistoryList> {
        Arc::clone(&self.history)
    }

    pub(crate) fn log_text(&self) -> String {
        self.log_text.clone()
    }

    /// Re-announces the current snapshot.
    pub(crate) fn refresh_displays(&self) {
        self.emit(ControllerEvent::HistoryChanged(self.history()));
    }

    pub(crate) fn disarm_merge_timer(&mut self) {
        self.merger.disarm();
    }

    /// Hands a reload result back for publication.
    pub(crate) fn complete_refresh(&mut self, snapshot: Option<HistoryList>) {
        let shared = Arc::clone(&self.shared);
        if shared.lifecycle.is_closing() {
            return;
        }
        tracing::debug!(published = snapshot.is_some(), "refresh worker completed");

        if let Some(history) = snapshot {
            shared.set_current_commander(history.commander_id);
            self.history = Arc::new(history);

            self.emit(ControllerEvent::CommandersChanged);
            if let Some(follow_up) = &shared.collab.follow_up {
                follow_up.stop();
            }
            self.emit(ControllerEvent::Progress {
                percent: -1,
                message: String::new(),
            });
            self.append_log("Refresh complete.".to_string(), Severity::Normal);
            self.refresh_displays();
        }

        for hook in std::mem::take(&mut self.refreshed_hooks) {
            hook(self);
        }

        self.emit(ControllerEvent::RefreshComplete);

        self.restart_producers();

        shared.refresh.complete();
        shared.signals.set(Signal::ReadyForRefresh);
    }

    /// Restarts the log monitor and the follow-up unless shutdown has begun.
    ///
    /// `shutdown` marks the lifecycle before stopping producers, so a close
    /// that lands after the first check is caught by the second one.
    fn restart_producers(&self) {
        let shared = &self.shared;
        if shared.lifecycle.is_closing() {
            return;
        }

        shared
            .collab
            .monitor
            .start(EntrySink::new(shared.publisher.clone()));
        let commander = self.history.commander_id;
        if commander >= 0 {
            if let Some(follow_up) = &shared.collab.follow_up {
                follow_up.start(commander);
            }
        }

        if shared.lifecycle.is_closing() {
            tracing::debug!("shutdown raced the refresh handback, stopping producers");
            shared.collab.monitor.stop();
            if let Some(follow_up) = &shared.collab.follow_up {
                follow_up.stop();
            }
        }
    }

    /// Hands a finished sync back.
    pub(crate) fn complete_sync(&mut self, state: SyncState) {
        let shared = Arc::clone(&self.shared);
        self.emit(ControllerEvent::Progress {
            percent: -1,
            message: String::new(),
        });

        let closing = shared.lifecycle.is_closing();
        if !closing {
            self.append_log("Loading completed.".to_string(), Severity::Success);

            if state.had_full_changes() {
                self.append_log(
                    "Refresh due to updated catalog data".to_string(),
                    Severity::Normal,
                );
                let totals = state;
                let hook_shared = Arc::clone(&shared);
                self.refreshed_hooks.push(Box::new(move |ctx| {
                    ctx.append_log("Refreshing complete.".to_string(), Severity::Normal);
                    let a_total = totals.full_a_count + totals.incremental_a_count;
                    if a_total > 0 {
                        ctx.append_log(
                            format!("Catalog A update complete with {a_total} records"),
                            Severity::Normal,
                        );
                    }
                    if totals.full_b_count > 0 {
                        ctx.append_log(
                            format!("Catalog B update complete with {} records", totals.full_b_count),
                            Severity::Normal,
                        );
                    }
                    hook_shared.sync_state.lock().clear_counters();
                }));
                shared.request_refresh_current();
            }
        }

        shared.release_sync();
        if !closing {
            self.emit(ControllerEvent::SyncComplete);
        }
        tracing::debug!("sync completed");
    }

    /// Runs on the publish context after the background workers have exited.
    pub(crate) fn final_close(&mut self) {
        self.shared.lifecycle.advance(LifecycleState::FinalClosed);
        self.emit(ControllerEvent::FinalClose);
        self.stopping = true;
    }

    fn submit_entry(&mut self, entry: JournalEntry) {
        if self.shared.lifecycle.is_closing() {
            tracing::trace!(id = entry.id, "dropping journal entry while closing");
            return;
        }
        let shared = &self.shared;
        let history = &mut self.history;
        self.merger
            .submit(entry, Instant::now(), |je| dispatch_entry(shared, history, je));
    }

    fn fire_merge_timer(&mut self) {
        let shared = &self.shared;
        let history = &mut self.history;
        self.merger
            .fire_if_due(Instant::now(), |je| dispatch_entry(shared, history, je));
    }
}

/// Delivers one finalized journal entry.
fn dispatch_entry(shared: &Shared, history: &mut Arc<HistoryList>, entry: JournalEntry) {
    let show_ui = shared.config.show_ui_events;

    if entry.is_ui_event {
        if let Some(text) = &entry.detail {
            shared.events.emit(ControllerEvent::NewUiEvent {
                text: text.clone(),
                shown: show_ui,
            });
        }
    }

    shared
        .events
        .emit(ControllerEvent::NewJournalEntry(entry.clone()));

    let load_game = entry.is_load_game();
    if entry.commander_id == history.commander_id && (!entry.is_ui_event || show_ui) {
        let he = Arc::make_mut(history).add_journal_entry(entry);
        shared.events.emit(ControllerEvent::NewHistoryEntry(he));
    }

    if load_game {
        shared.events.emit(ControllerEvent::CommandersChanged);
    }
}

/// Body of the publish thread.
pub(crate) fn run(rx: Receiver<Message>, mut state: PublishState) {
    tracing::debug!("publish context started");

    while !state.stopping {
        // A busy channel never times out, so an expired deadline is checked
        // before every receive.
        if state.merger.deadline().is_some_and(|deadline| deadline <= Instant::now()) {
            state.fire_merge_timer();
        }

        let message = match state.merger.deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => {
                        state.fire_merge_timer();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Task(task) => task(&mut state),
            Message::Entry(entry) => state.submit_entry(entry),
            Message::Stop => break,
        }
    }

    tracing::debug!("publish context exited");
}

impl Shared {
    /// Stops the publish loop without the final-close sequence. Used when the
    /// init worker could not be started.
    pub(crate) fn stop_publisher(&self) {
        self.publisher.stop();
    }
}
