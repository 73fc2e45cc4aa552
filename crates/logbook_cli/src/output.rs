//! Rendering of controller events for the terminal.

use clap::ValueEnum;
use logbook_core::{ControllerEvent, JournalEntry, Severity};
use serde::Serialize;

/// Output format for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// One human-readable line per event.
    Text,
    /// One JSON object per event.
    Json,
}

/// A single event as written in JSON output.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Event name.
    pub event: &'static str,
    /// Log or UI text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    /// Log severity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<&'static str>,
    /// Progress percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<i32>,
    /// Commander of a published history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commander: Option<i64>,
    /// Size of a published history, or index of a history entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Journal entry carried by the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<&'a JournalEntry>,
}

impl<'a> EventRecord<'a> {
    fn named(event: &'static str) -> Self {
        Self {
            event,
            text: None,
            severity: None,
            percent: None,
            commander: None,
            count: None,
            entry: None,
        }
    }

    /// Builds the record for `event`.
    pub fn from_event(event: &'a ControllerEvent) -> Self {
        let mut record = Self::named(name(event));
        match event {
            ControllerEvent::HistoryChanged(history) => {
                record.commander = Some(history.commander_id);
                record.count = Some(history.len());
            }
            ControllerEvent::NewLogEntry { text, severity } => {
                record.text = Some(text);
                record.severity = Some(severity_name(*severity));
            }
            ControllerEvent::NewUiEvent { text, .. } => record.text = Some(text),
            ControllerEvent::NewJournalEntry(entry) => record.entry = Some(entry),
            ControllerEvent::NewHistoryEntry(he) => {
                record.count = Some(he.index);
                record.entry = Some(&he.entry);
            }
            ControllerEvent::Progress { percent, message } => {
                record.percent = Some(*percent);
                record.text = Some(message);
            }
            _ => {}
        }
        record
    }
}

/// Stable snake_case name of an event.
pub fn name(event: &ControllerEvent) -> &'static str {
    match event {
        ControllerEvent::RefreshStarting => "refresh_starting",
        ControllerEvent::CommandersChanged => "commanders_changed",
        ControllerEvent::HistoryChanged(_) => "history_changed",
        ControllerEvent::RefreshComplete => "refresh_complete",
        ControllerEvent::InitialSyncComplete => "initial_sync_complete",
        ControllerEvent::InitialisationComplete => "initialisation_complete",
        ControllerEvent::NewLogEntry { .. } => "log",
        ControllerEvent::NewUiEvent { .. } => "ui_event",
        ControllerEvent::NewJournalEntry(_) => "journal_entry",
        ControllerEvent::NewHistoryEntry(_) => "history_entry",
        ControllerEvent::Progress { .. } => "progress",
        ControllerEvent::SyncStarting => "sync_starting",
        ControllerEvent::SyncComplete => "sync_complete",
        ControllerEvent::BackgroundSafeClose => "background_safe_close",
        ControllerEvent::FinalClose => "final_close",
    }
}

fn severity_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Normal => "normal",
        Severity::Highlight => "highlight",
        Severity::Success => "success",
    }
}

fn describe_entry(entry: &JournalEntry) -> String {
    let mut line = format!("#{} {} (commander {})", entry.id, entry.kind, entry.commander_id);
    if entry.repeat > 0 {
        line.push_str(&format!(" x{}", entry.repeat + 1));
    }
    if let Some(detail) = &entry.detail {
        line.push_str(&format!(": {detail}"));
    }
    line
}

/// Renders `event`, or returns `None` if it has nothing to show.
pub fn render(event: &ControllerEvent, format: Format) -> Option<String> {
    match format {
        Format::Json => serde_json::to_string(&EventRecord::from_event(event)).ok(),
        Format::Text => match event {
            // Already written by the tracing subscriber.
            ControllerEvent::NewLogEntry { .. } => None,
            ControllerEvent::Progress { percent, .. } if *percent < 0 => None,
            ControllerEvent::Progress { percent, message } => Some(format!("[{percent:>3}%] {message}")),
            ControllerEvent::HistoryChanged(history) => Some(format!(
                "history: commander {} with {} entries",
                history.commander_id,
                history.len()
            )),
            ControllerEvent::NewUiEvent { text, .. } => Some(format!("ui: {text}")),
            ControllerEvent::NewJournalEntry(entry) => Some(format!("journal {}", describe_entry(entry))),
            ControllerEvent::NewHistoryEntry(he) => {
                Some(format!("history[{}] {}", he.index, describe_entry(&he.entry)))
            }
            other => Some(name(other).replace('_', " ")),
        },
    }
}
