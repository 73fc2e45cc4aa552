//! Collaborators the controller drives but does not implement.
//!
//! These traits abstract the journal monitor, the history loader, the two
//! remote catalogs and the settings store, allowing different implementations
//! (file-backed, network, in-memory for testing).

use crate::coalesce::RefreshRequest;
use crate::error::ControllerResult;
use crate::history::HistoryList;
use crate::merge::MergePolicy;
use crate::publish::EntrySink;
use crate::report::TaskContext;
use std::sync::Arc;
use std::time::SystemTime;

/// Watches the journal and emits new entries.
pub trait LogMonitor: Send + Sync {
    /// Starts (or resumes) delivering entries to `sink`.
    fn start(&self, sink: EntrySink);

    /// Stops delivering entries. Must be idempotent.
    fn stop(&self);
}

/// Builds the history snapshot.
pub trait HistoryLoader: Send + Sync {
    /// Loads the history described by `request`.
    ///
    /// Implementations should call [`TaskContext::check_closing`] between
    /// files and return early when closing. `Ok(None)` means there was
    /// nothing to publish.
    fn load(
        &self,
        monitor: &dyn LogMonitor,
        ctx: &TaskContext<'_>,
        request: &RefreshRequest,
    ) -> ControllerResult<Option<HistoryList>>;
}

/// A remote reference-data catalog.
pub trait CatalogClient: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Whether a full sync is needed at startup.
    fn needs_full_sync(&self) -> bool {
        false
    }

    /// Time of the newest record held locally, if any.
    fn last_record_time(&self) -> Option<SystemTime> {
        None
    }

    /// Downloads the whole catalog. Returns the number of records changed.
    fn full_sync(&self, grids: &[u32], ctx: &TaskContext<'_>) -> ControllerResult<u64>;

    /// Downloads records newer than [`CatalogClient::last_record_time`].
    fn incremental_sync(&self, grids: &[u32], ctx: &TaskContext<'_>) -> ControllerResult<u64> {
        let _ = (grids, ctx);
        Ok(0)
    }

    /// Aborts any transfer in progress. Must be idempotent.
    fn stop(&self) {}
}

/// Local storage used by the sequencer and startup.
pub trait Persistence: Send + Sync {
    /// Rebuilds the secondary lookup indexes over catalog data.
    fn rebuild_indexes(&self) -> ControllerResult<()>;

    /// Reads a setting.
    fn get_setting(&self, key: &str) -> Option<String>;

    /// Writes a setting.
    fn put_setting(&self, key: &str, value: &str) -> ControllerResult<()>;
}

/// Per-commander work started after each refresh (e.g. fetching the
/// commander's remote log).
pub trait FollowUp: Send + Sync {
    /// Starts work for a commander.
    fn start(&self, commander_id: i64);

    /// Stops any work in progress. Must be idempotent.
    fn stop(&self);
}

/// Reference data loaded once at startup, optionally re-downloaded when stale.
pub trait ReferenceLoader: Send + Sync {
    /// Name used in log lines and as the settings key prefix.
    fn name(&self) -> &str;

    /// Whether this loader has a periodic download step.
    fn downloads(&self) -> bool {
        false
    }

    /// Fetches fresh data.
    fn download(&self, ctx: &TaskContext<'_>) -> ControllerResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Loads the local data into memory.
    fn load(&self, ctx: &TaskContext<'_>) -> ControllerResult<()>;
}

/// Everything the controller needs from the outside world.
pub struct Collaborators {
    /// Journal monitor.
    pub monitor: Arc<dyn LogMonitor>,
    /// History loader.
    pub loader: Arc<dyn HistoryLoader>,
    /// Primary catalog (full and incremental sync).
    pub catalog_a: Arc<dyn CatalogClient>,
    /// Secondary catalog (full sync only).
    pub catalog_b: Arc<dyn CatalogClient>,
    /// Settings and index store.
    pub persistence: Arc<dyn Persistence>,
    /// Optional per-commander follow-up.
    pub follow_up: Option<Arc<dyn FollowUp>>,
    /// Startup reference loaders, run in order.
    pub reference: Vec<Arc<dyn ReferenceLoader>>,
    /// Merge policy override. Defaults to a per-kind policy from the config.
    pub merge_policy: Option<Box<dyn MergePolicy>>,
}

impl Collaborators {
    /// Creates a collaborator set with no follow-up or reference loaders.
    pub fn new(
        monitor: Arc<dyn LogMonitor>,
        loader: Arc<dyn HistoryLoader>,
        catalog_a: Arc<dyn CatalogClient>,
        catalog_b: Arc<dyn CatalogClient>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            monitor,
            loader,
            catalog_a,
            catalog_b,
            persistence,
            follow_up: None,
            reference: Vec::new(),
            merge_policy: None,
        }
    }

    /// Sets the follow-up.
    pub fn with_follow_up(mut self, follow_up: Arc<dyn FollowUp>) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    /// Adds a reference loader.
    pub fn with_reference_loader(mut self, loader: Arc<dyn ReferenceLoader>) -> Self {
        self.reference.push(loader);
        self
    }

    /// Overrides the merge policy.
    pub fn with_merge_policy(mut self, policy: Box<dyn MergePolicy>) -> Self {
        self.merge_policy = Some(policy);
        self
    }
}
