//! The refresh worker thread.
//!
//! ```text
//! WaitReadiness --ready--> WaitRequest --request--> Processing --handback--> WaitReadiness
//!       |                       |                        |
//!       +------- close ---------+------- close ----------+--> exit
//! ```
//!
//! Readiness is raised by the publish context once the previous result has
//! been fully published, so at most one reload is ever in progress and a new
//! one never starts while the last snapshot is still being handed over.

use crate::coalesce::RefreshRequest;
use crate::controller::Shared;
use crate::events::ControllerEvent;
use crate::report::{contain, TaskContext};
use crate::signal::Signal;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) struct RefreshWorker {
    shared: Arc<Shared>,
}

impl RefreshWorker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
        let worker = Self { shared };
        thread::Builder::new()
            .name("logbook-refresh".into())
            .spawn(move || worker.run())
    }

    fn run(self) {
        let shared = &self.shared;
        tracing::debug!("refresh worker started");

        if shared.signals.wait_any(&[Signal::Close, Signal::ReadyForRefresh]) == Signal::Close {
            return;
        }

        while !shared.lifecycle.is_closing() {
            if shared.signals.wait_any(&[Signal::Close, Signal::RefreshRequested]) == Signal::Close
                || shared.lifecycle.is_closing()
            {
                break;
            }

            let Some(request) = shared.refresh.drain_latest() else {
                continue;
            };

            shared.collab.monitor.stop();
            if let Some(follow_up) = &shared.collab.follow_up {
                follow_up.stop();
            }
            let _ = shared
                .publisher
                .post(|ctx| ctx.emit(ControllerEvent::RefreshStarting));

            shared.signals.reset(Signal::ReadyForRefresh);
            reload_history(shared, request);

            if shared.signals.wait_any(&[Signal::Close, Signal::ReadyForRefresh]) == Signal::Close {
                break;
            }
        }

        tracing::debug!("refresh worker exited");
    }
}

/// Loads a history for `request` and posts the result to the publish context.
///
/// Loader errors and panics are logged and published as "no snapshot", so
/// the handback (and with it the readiness signal) always happens.
pub(crate) fn reload_history(shared: &Arc<Shared>, request: RefreshRequest) {
    tracing::debug!(?request, "load history");

    let is_closing = || shared.lifecycle.is_closing();
    let ctx = TaskContext::new(&is_closing, &shared.reporter);

    let snapshot = match contain("history loader", || {
        shared
            .collab
            .loader
            .load(shared.collab.monitor.as_ref(), &ctx, &request)
    }) {
        Ok(snapshot) => snapshot,
        Err(err) if err.is_cancelled() => None,
        Err(err) => {
            shared
                .reporter
                .log_highlight(format!("History refresh error: {err}"));
            None
        }
    };
    tracing::debug!(loaded = snapshot.is_some(), "load history complete");

    // The first handback waits for the host to finish its own setup.
    shared
        .signals
        .wait_any(&[Signal::Close, Signal::InitComplete]);

    if shared
        .publisher
        .post(move |ctx| ctx.complete_refresh(snapshot))
        .is_err()
    {
        tracing::debug!("refresh result dropped, publish context closed");
    }
}
