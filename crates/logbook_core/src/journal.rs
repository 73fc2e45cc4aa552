//! Journal entries as seen by the controller.
//!
//! Parsing and classification happen upstream in the log monitor; the
//! controller only reads the attributes below.

use serde::{Deserialize, Serialize};

/// Kind name of the entry that marks a commander loading a game.
pub const LOAD_GAME: &str = "LoadGame";

/// A single journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Arrival order, assigned by the producer. Strictly increasing.
    #[serde(default)]
    pub id: u64,
    /// Event kind, e.g. `"FSDJump"` or `"Music"`.
    #[serde(rename = "event")]
    pub kind: String,
    /// Commander the entry belongs to.
    #[serde(default)]
    pub commander_id: i64,
    /// True for UI-only events that are hidden unless configured otherwise.
    #[serde(default)]
    pub is_ui_event: bool,
    /// Short human-readable detail, such as a music track for UI events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Number of additional entries folded into this one by merging.
    #[serde(default)]
    pub repeat: u32,
    /// Remaining payload, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl JournalEntry {
    /// Creates an entry with no detail or payload.
    pub fn new(id: u64, kind: impl Into<String>, commander_id: i64) -> Self {
        Self {
            id,
            kind: kind.into(),
            commander_id,
            is_ui_event: false,
            detail: None,
            repeat: 0,
            data: serde_json::Value::Null,
        }
    }

    /// Marks the entry as a UI event with the given display text.
    pub fn ui_event(mut self, detail: impl Into<String>) -> Self {
        self.is_ui_event = true;
        self.detail = Some(detail.into());
        self
    }

    /// Attaches a payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Returns true if this entry is a game load.
    pub fn is_load_game(&self) -> bool {
        self.kind == LOAD_GAME
    }

    /// Parses one JSON line.
    pub fn from_json_line(line: &str) -> crate::ControllerResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}
