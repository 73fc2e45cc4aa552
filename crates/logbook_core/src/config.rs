//! Configuration for the controller.

use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a [`Controller`](crate::Controller).
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Whether catalog synchronization runs at all.
    pub sync_enabled: bool,
    /// Whether UI events are added to the history.
    pub show_ui_events: bool,
    /// Grid cells passed to catalog clients. Empty means all cells.
    pub grid_filter: Vec<u32>,
    /// Minimum age of catalog A's newest record before an incremental sync runs.
    pub incremental_threshold: Duration,
    /// Per-kind delay during which a journal entry waits for companions.
    pub merge_delays: HashMap<String, Duration>,
    /// How often reference data is downloaded again.
    pub reference_refresh: Duration,
}

impl ControllerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_enabled: true,
            show_ui_events: false,
            grid_filter: Vec::new(),
            incremental_threshold: Duration::from_secs(60 * 60),
            merge_delays: default_merge_delays(),
            reference_refresh: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }

    /// Enables or disables catalog synchronization.
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    /// Shows or hides UI events in the history.
    pub fn with_show_ui_events(mut self, show: bool) -> Self {
        self.show_ui_events = show;
        self
    }

    /// Sets the grid filter.
    pub fn with_grid_filter(mut self, grids: impl IntoIterator<Item = u32>) -> Self {
        self.grid_filter = grids.into_iter().collect();
        self
    }

    /// Sets the incremental sync threshold.
    pub fn with_incremental_threshold(mut self, threshold: Duration) -> Self {
        self.incremental_threshold = threshold;
        self
    }

    /// Sets the merge delay for one entry kind. A zero delay removes it.
    pub fn with_merge_delay(mut self, kind: impl Into<String>, delay: Duration) -> Self {
        let kind = kind.into();
        if delay.is_zero() {
            self.merge_delays.remove(&kind);
        } else {
            self.merge_delays.insert(kind, delay);
        }
        self
    }

    /// Sets the reference data refresh interval.
    pub fn with_reference_refresh(mut self, interval: Duration) -> Self {
        self.reference_refresh = interval;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_merge_delays() -> HashMap<String, Duration> {
    [
        ("UnderAttack", Duration::from_secs(2)),
        ("FSSSignalDiscovered", Duration::from_secs(2)),
        ("ShipTargeted", Duration::from_millis(250)),
    ]
    .into_iter()
    .map(|(kind, delay)| (kind.to_string(), delay))
    .collect()
}
