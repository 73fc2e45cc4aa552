//! The derived history snapshot.

use crate::journal::JournalEntry;

/// One journal entry placed in the history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Position in the history, starting at zero.
    pub index: usize,
    /// The underlying journal entry.
    pub entry: JournalEntry,
}

/// History of a single commander, produced by the history loader and then
/// extended with live entries on the publish context.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryList {
    /// Commander this history belongs to. Negative means none selected.
    pub commander_id: i64,
    entries: Vec<HistoryEntry>,
}

impl HistoryList {
    /// Creates an empty history for a commander.
    pub fn new(commander_id: i64) -> Self {
        Self {
            commander_id,
            entries: Vec::new(),
        }
    }

    /// Builds a history from loaded entries, in order.
    pub fn from_entries(commander_id: i64, entries: impl IntoIterator<Item = JournalEntry>) -> Self {
        let mut history = Self::new(commander_id);
        for entry in entries {
            history.add_journal_entry(entry);
        }
        history
    }

    /// Appends an entry and returns the new history entry.
    pub fn add_journal_entry(&mut self, entry: JournalEntry) -> HistoryEntry {
        let he = HistoryEntry {
            index: self.entries.len(),
            entry,
        };
        self.entries.push(he.clone());
        he
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }
}

impl Default for HistoryList {
    fn default() -> Self {
        Self::new(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_indexed_in_order() {
        let history = HistoryList::from_entries(
            1,
            (1..=3).map(|i| JournalEntry::new(i, "FSDJump", 1)),
        );

        assert_eq!(history.len(), 3);
        let ids: Vec<u64> = history.entries().iter().map(|h| h.entry.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(history.last().map(|h| h.index), Some(2));
    }

    #[test]
    fn default_has_no_commander() {
        let history = HistoryList::default();
        assert!(history.is_empty());
        assert!(history.commander_id < 0);
    }
}
