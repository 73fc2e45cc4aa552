//! Catalog synchronization sequencing.
//!
//! A sync run walks a fixed sequence of steps. Each catalog step is isolated:
//! a failing or panicking catalog is logged and the remaining steps still
//! run. The closing predicate is checked immediately before every step; a
//! step already running is never interrupted, later steps are skipped.

use crate::collab::{CatalogClient, Persistence};
use crate::report::{isolate, TaskContext};
use std::time::{Duration, SystemTime};

/// Which catalogs need a full sync, and what the last run achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Catalog A needs a full download.
    pub need_full_a: bool,
    /// Catalog B needs a full download.
    pub need_full_b: bool,
    /// Records changed by the last full sync of A.
    pub full_a_count: u64,
    /// Records changed by the last full sync of B.
    pub full_b_count: u64,
    /// Records changed by the last incremental sync of A.
    pub incremental_a_count: u64,
}

impl SyncState {
    /// Resets the counters, keeping the need flags.
    pub fn clear_counters(&mut self) {
        self.full_a_count = 0;
        self.full_b_count = 0;
        self.incremental_a_count = 0;
    }

    /// Returns true if either catalog needs a full sync.
    pub fn needs_full(&self) -> bool {
        self.need_full_a || self.need_full_b
    }

    /// Returns true if a full sync changed anything.
    pub fn had_full_changes(&self) -> bool {
        self.full_a_count > 0 || self.full_b_count > 0
    }
}

/// Runs one synchronization pass over both catalogs.
pub struct SyncSequencer<'a> {
    catalog_a: &'a dyn CatalogClient,
    catalog_b: &'a dyn CatalogClient,
    persistence: &'a dyn Persistence,
    grids: &'a [u32],
    incremental_threshold: Duration,
}

impl<'a> SyncSequencer<'a> {
    /// Creates a sequencer.
    pub fn new(
        catalog_a: &'a dyn CatalogClient,
        catalog_b: &'a dyn CatalogClient,
        persistence: &'a dyn Persistence,
        grids: &'a [u32],
        incremental_threshold: Duration,
    ) -> Self {
        Self {
            catalog_a,
            catalog_b,
            persistence,
            grids,
            incremental_threshold,
        }
    }

    /// Runs the sequence, updating `state` in place.
    pub fn run(&self, state: &mut SyncState, ctx: &TaskContext<'_>) {
        let reporter = ctx.reporter();
        tracing::debug!(?state, "perform sync");

        ctx.progress(-1, "");
        state.clear_counters();

        if state.need_full_a && !ctx.is_closing() {
            let name = self.catalog_a.name();
            if let Some(count) = isolate(reporter, name, || self.catalog_a.full_sync(self.grids, ctx)) {
                state.full_a_count = count;
                state.need_full_a = false;
            }
        }

        if !ctx.is_closing() {
            self.rebuild_indexes(ctx);
        }

        if state.need_full_b && !ctx.is_closing() {
            let name = self.catalog_b.name();
            if let Some(count) = isolate(reporter, name, || self.catalog_b.full_sync(self.grids, ctx)) {
                state.full_b_count = count;
                state.need_full_b = false;
            }
        }

        if !ctx.is_closing() {
            self.rebuild_indexes(ctx);

            if self.incremental_due(SystemTime::now()) {
                ctx.log(format!(
                    "Checking for updated {} records (may take a few moments).",
                    self.catalog_a.name()
                ));
                let name = self.catalog_a.name();
                if let Some(count) =
                    isolate(reporter, name, || self.catalog_a.incremental_sync(self.grids, ctx))
                {
                    state.incremental_a_count = count;
                }
            }
        }

        ctx.progress(-1, "");
        tracing::debug!(?state, "sync sequence finished");
    }

    fn rebuild_indexes(&self, ctx: &TaskContext<'_>) {
        ctx.log("Indexing catalog tables");
        isolate(ctx.reporter(), "index rebuild", || self.persistence.rebuild_indexes());
    }

    /// Returns true if catalog A's newest record is older than the threshold.
    /// A catalog with no records is always due.
    pub fn incremental_due(&self, now: SystemTime) -> bool {
        match self.catalog_a.last_record_time() {
            Some(last) => now
                .duration_since(last)
                .map(|age| age >= self.incremental_threshold)
                .unwrap_or(false),
            None => true,
        }
    }
}
