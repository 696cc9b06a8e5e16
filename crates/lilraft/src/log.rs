//! # log
//!
//! why: manage the index-keyed log of values that raft replicates
//! relations: owned by node.rs, entries carried inside message.rs AppendEntries
//! what: LogEntry struct, RaftLog store, log matching and freshness checks

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// Opaque value applied to the state machine
    pub value: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            term,
            index,
            value: value.into(),
        }
    }
}

/// Entries keyed by index, contiguous from 1.
///
/// Index 0 is never stored. It acts as the virtual base of every log and
/// always reports term 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaftLog {
    entries: BTreeMap<u64, LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a log from entries, rejecting gaps, duplicates and index 0.
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Result<Self, String> {
        let mut log = Self::new();
        for entry in entries {
            let expected = log.last_index() + 1;
            if entry.index != expected {
                return Err(format!(
                    "entry index {} out of sequence, expected {expected}",
                    entry.index
                ));
            }
            log.insert(entry);
        }
        Ok(log)
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(&index)
    }

    /// Term stored at `index`, `Some(0)` for the virtual base.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entries.get(&index).map(|e| e.term)
    }

    /// Whether the log holds `index` with exactly `term`.
    pub fn matches(&self, index: u64, term: u64) -> bool {
        self.term_at(index) == Some(term)
    }

    pub fn last_index(&self) -> u64 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    pub fn last_term(&self) -> u64 {
        self.entries.values().next_back().map_or(0, |e| e.term)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `entry` at its index, replacing whatever was there.
    pub fn insert(&mut self, entry: LogEntry) {
        self.entries.insert(entry.index, entry);
    }

    /// Removes every entry at or after `index`, returning how many went.
    pub fn truncate_from(&mut self, index: u64) -> usize {
        let removed = self.entries.split_off(&index);
        removed.len()
    }

    /// Clones every entry at or after `index`.
    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        self.entries.range(index..).map(|(_, e)| e.clone()).collect()
    }

    /// Clones entries in `(after, through]`.
    pub fn entries_between(&self, after: u64, through: u64) -> Vec<LogEntry> {
        if through <= after {
            return Vec::new();
        }
        self.entries
            .range(after + 1..=through)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    /// Canonical up-to-date check: a candidate log ending at
    /// `(last_log_term, last_log_index)` is at least as fresh as this one.
    pub fn is_up_to_date(&self, last_log_term: u64, last_log_index: u64) -> bool {
        (last_log_term, last_log_index) >= (self.last_term(), self.last_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_of(terms: &[u64]) -> RaftLog {
        let entries = terms
            .iter()
            .enumerate()
            .map(|(i, &t)| LogEntry::new(t, i as u64 + 1, vec![i as u8]));
        RaftLog::from_entries(entries).unwrap()
    }

    #[test]
    fn empty_log_has_virtual_base() {
        let log = RaftLog::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert!(log.is_empty());
        assert!(log.matches(0, 0));
        assert!(!log.matches(0, 1));
        assert_eq!(log.term_at(1), None);
    }

    #[test]
    fn from_entries_rejects_gaps() {
        let entries = vec![LogEntry::new(1, 1, "a"), LogEntry::new(1, 3, "c")];
        assert!(RaftLog::from_entries(entries).is_err());
    }

    #[test]
    fn from_entries_rejects_index_zero() {
        assert!(RaftLog::from_entries(vec![LogEntry::new(1, 0, "a")]).is_err());
    }

    #[test]
    fn truncate_removes_suffix() {
        let mut log = log_of(&[1, 1, 2, 2]);
        assert_eq!(log.truncate_from(3), 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn entries_between_is_half_open() {
        let log = log_of(&[1, 1, 1, 1]);
        let slice = log.entries_between(1, 3);
        assert_eq!(slice.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3]);
        assert!(log.entries_between(3, 3).is_empty());
    }

    #[test]
    fn higher_last_term_wins_even_if_shorter() {
        let log = log_of(&[1, 1, 1]);
        assert!(log.is_up_to_date(2, 1));
        assert!(!log.is_up_to_date(1, 2));
        assert!(log.is_up_to_date(1, 3));
    }
}
