//! Notifications published by the controller.
//!
//! Every notification is a [`ControllerEvent`] delivered to all subscribers
//! through an mpsc channel. Apart from [`ControllerEvent::BackgroundSafeClose`],
//! which is emitted from the init worker, events are emitted from the publish
//! context, so a subscriber always sees them in the documented order. The one
//! exception is a controller closed before its publish context ever ran; its
//! single `FinalClose` is emitted by the thread that closed it.
//!
//! 1. `RefreshStarting`
//! 2. `CommandersChanged`
//! 3. `HistoryChanged`
//! 4. `RefreshComplete`
//! 5. `InitialSyncComplete`, `InitialisationComplete` (startup only)
//! 6. `NewLogEntry`, `NewUiEvent`, `NewJournalEntry`, `NewHistoryEntry`
//! 7. `SyncStarting`, `SyncComplete`
//! 8. `BackgroundSafeClose`, `FinalClose`
//!
//! `Progress` may be interleaved anywhere.

use crate::history::{HistoryEntry, HistoryList};
use crate::journal::JournalEntry;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// How a log line should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Ordinary progress text.
    Normal,
    /// Warnings and errors.
    Highlight,
    /// Completion of a long operation.
    Success,
}

/// A notification from the controller.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A history reload is about to start.
    RefreshStarting,
    /// The set of commanders, or the current one, may have changed.
    CommandersChanged,
    /// A new history snapshot was published.
    HistoryChanged(Arc<HistoryList>),
    /// A history reload cycle finished, successfully or not.
    RefreshComplete,
    /// Startup reference loading finished.
    InitialSyncComplete,
    /// Startup sequencing finished.
    InitialisationComplete,
    /// A line was written to the log sink.
    NewLogEntry {
        /// Text of the line.
        text: String,
        /// Presentation.
        severity: Severity,
    },
    /// A UI event arrived.
    NewUiEvent {
        /// Display text.
        text: String,
        /// Whether UI events are shown in the history.
        shown: bool,
    },
    /// A journal entry was delivered, for any commander.
    NewJournalEntry(JournalEntry),
    /// An entry was appended to the current commander's history.
    NewHistoryEntry(HistoryEntry),
    /// Progress of a long operation. A negative percent clears the display.
    Progress {
        /// Percent complete, or negative.
        percent: i32,
        /// Message.
        message: String,
    },
    /// A catalog sync was accepted.
    SyncStarting,
    /// A catalog sync finished.
    SyncComplete,
    /// Background workers have exited.
    BackgroundSafeClose,
    /// The controller is fully closed.
    FinalClose,
}

/// Fan-out of controller events to subscribers.
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<ControllerEvent>>>,
}

impl EventFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<ControllerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber, dropping disconnected ones.
    pub fn emit(&self, event: ControllerEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new()
    }
}
