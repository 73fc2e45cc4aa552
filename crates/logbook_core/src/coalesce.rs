//! Coalescing of history refresh requests.
//!
//! Reloading the history is expensive and only the final parameters matter,
//! so requests from any thread are queued here and the refresh worker drains
//! the queue keeping only the most recent one.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Parameters of a history reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Alternate location of the legacy log files, if any.
    pub log_path: Option<PathBuf>,
    /// Re-read legacy log files even if already imported.
    pub force_log_reload: bool,
    /// Re-read journal files even if already imported.
    pub force_entry_reload: bool,
    /// Commander whose history is loaded.
    pub commander_id: i64,
}

impl RefreshRequest {
    /// Request a plain reload for a commander.
    pub fn for_commander(commander_id: i64) -> Self {
        Self {
            log_path: None,
            force_log_reload: false,
            force_entry_reload: false,
            commander_id,
        }
    }

    /// Sets the legacy log location.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Forces re-reading legacy logs.
    pub fn force_log_reload(mut self) -> Self {
        self.force_log_reload = true;
        self
    }

    /// Forces re-reading journal files.
    pub fn force_entry_reload(mut self) -> Self {
        self.force_entry_reload = true;
        self
    }
}

/// Pending refresh queue plus the refresh-in-flight guard.
///
/// The guard is set when a request is accepted while idle and is cleared by
/// [`RequestCoalescer::complete`] once a cycle's result is published and no
/// further request is waiting.
#[derive(Debug, Default)]
pub struct RequestCoalescer {
    queue: Mutex<Pending>,
    in_flight: AtomicBool,
}

#[derive(Debug, Default)]
struct Pending {
    requests: VecDeque<RefreshRequest>,
    /// Request being processed, or the last one processed.
    current: Option<RefreshRequest>,
}

impl RequestCoalescer {
    /// Creates an idle coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a request.
    ///
    /// Accepted if no refresh was in flight, or if it differs from the
    /// newest queued request (the one being processed when the queue is
    /// empty). Returns true if the request was queued; the caller then raises
    /// the refresh signal.
    pub fn offer(&self, request: RefreshRequest) -> bool {
        let mut pending = self.queue.lock();
        let claimed = self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        let newest = pending.requests.back().or(pending.current.as_ref());
        let differs = newest != Some(&request);

        if claimed || differs {
            pending.requests.push_back(request);
            true
        } else {
            false
        }
    }

    /// Claims the guard for a request run directly, bypassing the queue.
    /// Returns false if a refresh is already in flight.
    pub fn claim(&self, request: RefreshRequest) -> bool {
        let mut pending = self.queue.lock();
        let claimed = self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if claimed {
            pending.current = Some(request);
        }
        claimed
    }

    /// Drains the queue, returning only the most recently queued request.
    pub fn drain_latest(&self) -> Option<RefreshRequest> {
        let mut pending = self.queue.lock();
        let latest = pending.requests.drain(..).last()?;
        pending.current = Some(latest.clone());
        Some(latest)
    }

    /// Marks the current cycle as published. The guard stays set if more
    /// requests are already waiting.
    pub fn complete(&self) {
        let pending = self.queue.lock();
        if pending.requests.is_empty() {
            self.in_flight.store(false, Ordering::SeqCst);
        }
    }

    /// Returns true while a refresh is in flight or queued.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of queued requests.
    pub fn queued(&self) -> usize {
        self.queue.lock().requests.len()
    }

    /// The request being processed, or the last one processed.
    pub fn current(&self) -> Option<RefreshRequest> {
        self.queue.lock().current.clone()
    }
}
