//! # Logbook Core
//!
//! Background orchestration controller for a journal-driven history.
//!
//! This crate provides:
//! - A controller that owns the startup, steady-state and shutdown lifecycle
//! - Request coalescing for history reloads (at most one in flight)
//! - Time-windowed merging of repetitive journal entries
//! - Sequenced catalog synchronization with per-step failure isolation
//! - A subscriber feed of controller notifications
//!
//! ## Architecture
//!
//! Three long-lived threads cooperate:
//! 1. The **init worker** runs startup, then waits for resync requests
//! 2. The **refresh worker** reloads history whenever asked, one load at a time
//! 3. The **publish context** owns the published snapshot and the merge queue
//!
//! Workers never touch published state directly; they post results to the
//! publish context, which emits notifications in a single, ordered stream.
//!
//! ## Key Invariants
//!
//! - At most one history reload runs at a time
//! - Every journal entry is delivered exactly once, in arrival order
//! - At most one catalog sync runs at a time
//! - Shutdown is idempotent and ends with exactly one `FinalClose`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coalesce;
mod collab;
mod config;
mod controller;
mod error;
mod events;
mod history;
mod init;
mod journal;
mod lifecycle;
mod merge;
pub mod mock;
mod publish;
mod refresh;
mod report;
mod signal;
mod sync;

pub use coalesce::{RefreshRequest, RequestCoalescer};
pub use collab::{
    CatalogClient, Collaborators, FollowUp, HistoryLoader, LogMonitor, Persistence,
    ReferenceLoader,
};
pub use config::ControllerConfig;
pub use controller::{Controller, CURRENT_COMMANDER_KEY};
pub use error::{ControllerError, ControllerResult};
pub use events::{ControllerEvent, EventFeed, Severity};
pub use history::{HistoryEntry, HistoryList};
pub use journal::{JournalEntry, LOAD_GAME};
pub use lifecycle::LifecycleState;
pub use merge::{JournalMerger, KindMergePolicy, MergePolicy};
pub use publish::EntrySink;
pub use report::{Reporter, TaskContext};
pub use signal::{Signal, Signals};
pub use sync::{SyncSequencer, SyncState};
