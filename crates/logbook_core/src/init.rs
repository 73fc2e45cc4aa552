//! The init worker thread: startup sequencing, the resync loop, and the
//! background half of shutdown.

use crate::coalesce::RefreshRequest;
use crate::collab::ReferenceLoader;
use crate::controller::{Shared, CURRENT_COMMANDER_KEY};
use crate::events::ControllerEvent;
use crate::lifecycle::LifecycleState;
use crate::refresh::{reload_history, RefreshWorker};
use crate::report::{isolate, TaskContext};
use crate::signal::Signal;
use crate::sync::SyncSequencer;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) struct InitWorker {
    shared: Arc<Shared>,
}

impl InitWorker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
        let worker = Self { shared };
        thread::Builder::new()
            .name("logbook-init".into())
            .spawn(move || worker.run())
    }

    fn run(self) {
        let shared = Arc::clone(&self.shared);
        tracing::debug!("init worker started");

        if shared
            .signals
            .wait_any(&[Signal::Close, Signal::ReadyForInitialLoad])
            == Signal::ReadyForInitialLoad
        {
            self.startup();

            if !shared.lifecycle.is_closing() {
                let refresh_worker = match RefreshWorker::spawn(Arc::clone(&shared)) {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        shared
                            .reporter
                            .log_highlight(format!("Unable to start refresh worker: {err}"));
                        None
                    }
                };

                if shared.config.sync_enabled {
                    if shared.claim_sync() {
                        self.perform_sync();
                    }
                } else {
                    shared
                        .reporter
                        .log("Catalog download disabled, use settings to re-enable it");
                }

                shared.lifecycle.advance(LifecycleState::Running);
                self.resync_loop();

                if let Some(handle) = refresh_worker {
                    if handle.join().is_err() {
                        tracing::error!("refresh worker panicked");
                    }
                }
            }
        }

        self.close();
    }

    /// One-time startup: indexes, sync state, reference data, first history load.
    fn startup(&self) {
        let shared = &self.shared;
        let reporter = &shared.reporter;
        reporter.progress(-1, "");

        isolate(reporter, "index rebuild", || shared.collab.persistence.rebuild_indexes());

        if shared.config.sync_enabled {
            let mut state = shared.sync_state.lock();
            state.need_full_a |= shared.collab.catalog_a.needs_full_sync();
            state.need_full_b |= shared.collab.catalog_b.needs_full_sync();
        }

        let is_closing = || shared.lifecycle.is_closing();
        let ctx = TaskContext::new(&is_closing, reporter);
        for loader in &shared.collab.reference {
            if ctx.is_closing() {
                break;
            }
            self.load_reference(loader.as_ref(), &ctx);
        }
        if !shared.collab.reference.is_empty() {
            reporter.log("Loaded reference data.");
        }

        reporter.progress(-1, "");
        let _ = shared
            .publisher
            .post(|ctx| ctx.emit(ControllerEvent::InitialSyncComplete));

        if shared.lifecycle.is_closing() {
            return;
        }
        reporter.log("Reading travel history");

        let commander = shared
            .collab
            .persistence
            .get_setting(CURRENT_COMMANDER_KEY)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let request = RefreshRequest::for_commander(commander);
        if shared.refresh.claim(request.clone()) {
            reload_history(shared, request);
        } else {
            // A request got in first; let the refresh worker take it.
            shared.signals.set(Signal::ReadyForRefresh);
        }

        if shared.lifecycle.is_closing() {
            return;
        }

        let pending = *shared.sync_state.lock();
        if shared.config.sync_enabled && pending.needs_full() {
            let catalogs = match (pending.need_full_a, pending.need_full_b) {
                (true, true) => format!(
                    "{} and {}",
                    shared.collab.catalog_a.name(),
                    shared.collab.catalog_b.name()
                ),
                (true, false) => shared.collab.catalog_a.name().to_string(),
                _ => shared.collab.catalog_b.name().to_string(),
            };
            reporter.log(format!(
                "Synchronising with {catalogs} to obtain reference data. This may take a while."
            ));
        }

        let _ = shared
            .publisher
            .post(|ctx| ctx.emit(ControllerEvent::InitialisationComplete));
    }

    /// Downloads reference data when stale, then loads it.
    fn load_reference(&self, loader: &dyn ReferenceLoader, ctx: &TaskContext<'_>) {
        let shared = &self.shared;
        let reporter = ctx.reporter();
        let name = loader.name();

        if loader.downloads() {
            let key = format!("{name}.last_download");
            let now = SystemTime::now();
            let stale = shared
                .collab
                .persistence
                .get_setting(&key)
                .and_then(|value| value.parse::<u64>().ok())
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
                .and_then(|last| now.duration_since(last).ok())
                .map_or(true, |age| age > shared.config.reference_refresh);

            if stale {
                reporter.log(format!("Get {name} reference data."));
                if isolate(reporter, name, || loader.download(ctx)).is_some() {
                    let secs = now
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();
                    isolate(reporter, "settings", || {
                        shared.collab.persistence.put_setting(&key, &secs.to_string())
                    });
                }
            }
        }

        isolate(reporter, name, || loader.load(ctx));
    }

    /// Steady state: one sync per resync signal until close.
    fn resync_loop(&self) {
        let shared = &self.shared;

        while !shared.lifecycle.is_closing() {
            match shared
                .signals
                .wait_any(&[Signal::Close, Signal::ResyncRequested])
            {
                Signal::Close => break,
                _ if shared.lifecycle.is_closing() => break,
                // Only raised by an accepted request, which requires sync enabled.
                _ => self.perform_sync(),
            }
        }
    }

    /// Runs the sequencer and posts its result. The caller holds the sync flag.
    fn perform_sync(&self) {
        let shared = &self.shared;
        let collab = &shared.collab;

        let is_closing = || shared.lifecycle.is_closing();
        let ctx = TaskContext::new(&is_closing, &shared.reporter);

        let mut state = *shared.sync_state.lock();
        SyncSequencer::new(
            collab.catalog_a.as_ref(),
            collab.catalog_b.as_ref(),
            collab.persistence.as_ref(),
            &shared.config.grid_filter,
            shared.config.incremental_threshold,
        )
        .run(&mut state, &ctx);
        *shared.sync_state.lock() = state;

        if shared
            .publisher
            .post(move |ctx| ctx.complete_sync(state))
            .is_err()
        {
            shared.release_sync();
        }
    }

    /// Background half of shutdown.
    fn close(&self) {
        let shared = &self.shared;
        shared.signals.wait_any(&[Signal::Close]);

        let hooks = std::mem::take(&mut *shared.safe_close_hooks.lock());
        for hook in hooks {
            isolate(&shared.reporter, "background close hook", || {
                hook();
                Ok(())
            });
        }
        shared.events.emit(ControllerEvent::BackgroundSafeClose);
        shared.lifecycle.advance(LifecycleState::BackgroundSafeClosed);
        tracing::debug!("background safe close complete");

        if shared.publisher.post(|ctx| ctx.final_close()).is_err() {
            shared.lifecycle.advance(LifecycleState::FinalClosed);
        }
    }
}
