//! Controller lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a controller. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, no threads running.
    Created = 0,
    /// Worker threads started, startup sequencing in progress.
    Initializing = 1,
    /// Startup finished, steady-state loops running.
    Running = 2,
    /// Shutdown requested; no new refresh or sync cycle may start.
    ClosingRequested = 3,
    /// Background workers have exited and safe-close hooks ran.
    BackgroundSafeClosed = 4,
    /// Final close notification delivered on the publish context.
    FinalClosed = 5,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Created,
            1 => LifecycleState::Initializing,
            2 => LifecycleState::Running,
            3 => LifecycleState::ClosingRequested,
            4 => LifecycleState::BackgroundSafeClosed,
            _ => LifecycleState::FinalClosed,
        }
    }

    /// Returns true once shutdown has been requested.
    pub fn is_closing(&self) -> bool {
        *self >= LifecycleState::ClosingRequested
    }
}

/// Atomic holder for [`LifecycleState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// Creates a lifecycle in [`LifecycleState::Created`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Created as u8),
        }
    }

    /// Current state.
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns true once shutdown has been requested.
    pub fn is_closing(&self) -> bool {
        self.get().is_closing()
    }

    /// Moves to `next` if it is strictly later than the current state.
    ///
    /// Returns true if this call performed the transition. Concurrent callers
    /// racing to the same state see exactly one `true`.
    pub fn advance(&self, next: LifecycleState) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
