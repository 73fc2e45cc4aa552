//! Catalog clients backed by local JSON-lines dumps.
//!
//! Each record is a JSON object. An optional `grid` field places it in a grid
//! cell for filtering, and an optional `timestamp` field (seconds since the
//! Unix epoch) marks when it last changed.

use logbook_core::{CatalogClient, ControllerError, ControllerResult, Persistence, TaskContext};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CHECK_EVERY: u64 = 500;

/// A catalog mirrored from a local dump file.
///
/// The time of the last successful sync is kept in the settings under
/// `<name>.last_sync`. Without a dump file the catalog has nothing to do.
pub struct LocalCatalog {
    name: String,
    source: Option<PathBuf>,
    settings: Arc<dyn Persistence>,
    stopped: AtomicBool,
}

impl LocalCatalog {
    /// Creates a catalog reading from `source`.
    pub fn new(
        name: impl Into<String>,
        source: Option<PathBuf>,
        settings: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            settings,
            stopped: AtomicBool::new(false),
        }
    }

    fn sync_key(&self) -> String {
        format!("{}.last_sync", self.name)
    }

    fn last_sync_secs(&self) -> Option<u64> {
        self.settings
            .get_setting(&self.sync_key())
            .and_then(|value| value.parse().ok())
    }

    fn mark_synced(&self) -> ControllerResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.settings.put_setting(&self.sync_key(), &now.to_string())
    }

    /// Counts records in the dump that pass the grid filter and, if `since`
    /// is given, changed after it.
    fn scan(&self, grids: &[u32], since: Option<u64>, ctx: &TaskContext<'_>) -> ControllerResult<u64> {
        let Some(path) = &self.source else {
            return Ok(0);
        };
        let file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                ControllerError::collaborator(&self.name, format!("{} not found", path.display()))
            }
            _ => err.into(),
        })?;

        let mut matched = 0;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line_no = line_no as u64;
            if line_no % CHECK_EVERY == 0 {
                if self.stopped.load(Ordering::SeqCst) {
                    return Err(ControllerError::Cancelled);
                }
                ctx.check_closing()?;
                if line_no > 0 {
                    ctx.progress(-1, format!("{}: {line_no} records read", self.name));
                }
            }

            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: serde_json::Value = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(catalog = %self.name, line = line_no + 1, %err, "skipping malformed record");
                    continue;
                }
            };

            let in_grid = grids.is_empty()
                || record
                    .get("grid")
                    .and_then(|g| g.as_u64())
                    .map_or(false, |g| grids.iter().any(|&cell| u64::from(cell) == g));
            let changed = match since {
                Some(since) => record
                    .get("timestamp")
                    .and_then(|t| t.as_u64())
                    .map_or(false, |t| t > since),
                None => true,
            };
            if in_grid && changed {
                matched += 1;
            }
        }
        Ok(matched)
    }
}

impl CatalogClient for LocalCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_full_sync(&self) -> bool {
        self.source.is_some() && self.last_sync_secs().is_none()
    }

    fn last_record_time(&self) -> Option<SystemTime> {
        if self.source.is_none() {
            return Some(SystemTime::now());
        }
        self.last_sync_secs()
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn full_sync(&self, grids: &[u32], ctx: &TaskContext<'_>) -> ControllerResult<u64> {
        ctx.log(format!("Loading {} catalog", self.name));
        let count = self.scan(grids, None, ctx)?;
        if self.source.is_some() {
            self.mark_synced()?;
        }
        Ok(count)
    }

    fn incremental_sync(&self, grids: &[u32], ctx: &TaskContext<'_>) -> ControllerResult<u64> {
        let since = self.last_sync_secs().unwrap_or(0);
        let count = self.scan(grids, Some(since), ctx)?;
        if self.source.is_some() {
            self.mark_synced()?;
        }
        Ok(count)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
