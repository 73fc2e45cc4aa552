//! Cross-thread signals with a wait-on-any primitive.
//!
//! Every blocking wait in the controller goes through [`Signals::wait_any`],
//! which always includes [`Signal::Close`] so that shutdown can wake any
//! waiter. Manual signals stay raised until reset; auto signals are consumed
//! by the single waiter that observes them.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A named signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Shutdown requested. Manual, never reset.
    Close,
    /// The host is ready for the initial load to begin. Manual.
    ReadyForInitialLoad,
    /// The host finished its own initialisation. Manual.
    InitComplete,
    /// The previous refresh has been fully published. Manual.
    ReadyForRefresh,
    /// A refresh request was queued. Auto-reset.
    RefreshRequested,
    /// A catalog resync was requested. Auto-reset.
    ResyncRequested,
}

impl Signal {
    fn bit(self) -> u8 {
        match self {
            Signal::Close => 1 << 0,
            Signal::ReadyForInitialLoad => 1 << 1,
            Signal::InitComplete => 1 << 2,
            Signal::ReadyForRefresh => 1 << 3,
            Signal::RefreshRequested => 1 << 4,
            Signal::ResyncRequested => 1 << 5,
        }
    }

    /// Returns true if observing this signal consumes it.
    pub fn is_auto_reset(self) -> bool {
        matches!(self, Signal::RefreshRequested | Signal::ResyncRequested)
    }
}

/// A set of signals sharing one condition variable.
#[derive(Debug, Default)]
pub struct Signals {
    raised: Mutex<u8>,
    changed: Condvar,
}

impl Signals {
    /// Creates a signal set with nothing raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises a signal and wakes all waiters.
    pub fn set(&self, signal: Signal) {
        let mut raised = self.raised.lock();
        *raised |= signal.bit();
        self.changed.notify_all();
    }

    /// Lowers a manual signal.
    pub fn reset(&self, signal: Signal) {
        *self.raised.lock() &= !signal.bit();
    }

    /// Returns true if the signal is currently raised.
    pub fn is_set(&self, signal: Signal) -> bool {
        *self.raised.lock() & signal.bit() != 0
    }

    /// Blocks until one of `signals` is raised and returns it.
    ///
    /// When several are raised the one listed first wins, so callers put
    /// `Close` first. Auto-reset signals are consumed on return.
    pub fn wait_any(&self, signals: &[Signal]) -> Signal {
        let mut raised = self.raised.lock();
        loop {
            if let Some(hit) = take_first(&mut raised, signals) {
                return hit;
            }
            self.changed.wait(&mut raised);
        }
    }

    /// Like [`Signals::wait_any`] but gives up after `timeout`.
    pub fn wait_any_timeout(&self, signals: &[Signal], timeout: Duration) -> Option<Signal> {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        loop {
            if let Some(hit) = take_first(&mut raised, signals) {
                return Some(hit);
            }
            if self.changed.wait_until(&mut raised, deadline).timed_out() {
                return take_first(&mut raised, signals);
            }
        }
    }
}

fn take_first(raised: &mut u8, signals: &[Signal]) -> Option<Signal> {
    let hit = signals.iter().copied().find(|s| *raised & s.bit() != 0)?;
    if hit.is_auto_reset() {
        *raised &= !hit.bit();
    }
    Some(hit)
}
