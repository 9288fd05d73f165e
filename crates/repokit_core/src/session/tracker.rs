//! Change-tracking table of a persistence session.
//!
//! # Invariants
//! - At most one entry per `(table, identity)`.
//! - `original` holds the last values known to be persisted; it is empty for
//!   `Added` entries.
//! - Entries keep insertion order so commits replay staged changes in the
//!   order they were made.

use crate::model::Value;
use indexmap::IndexMap;

/// Lifecycle state of one tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
    pub table: &'static str,
    pub identity: String,
}

impl EntryKey {
    pub fn new(table: &'static str, identity: String) -> Self {
        Self { table, identity }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedEntry {
    pub state: EntryState,
    pub original: Vec<Value>,
    pub current: Vec<Value>,
}

impl TrackedEntry {
    pub fn unchanged(values: Vec<Value>) -> Self {
        Self {
            state: EntryState::Unchanged,
            original: values.clone(),
            current: values,
        }
    }

    pub fn added(values: Vec<Value>) -> Self {
        Self {
            state: EntryState::Added,
            original: Vec::new(),
            current: values,
        }
    }

    /// Re-derives `Unchanged`/`Modified` after `current` was rewritten.
    pub fn refresh_state(&mut self) {
        if matches!(self.state, EntryState::Unchanged | EntryState::Modified) {
            self.state = if self.current == self.original {
                EntryState::Unchanged
            } else {
                EntryState::Modified
            };
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    entries: IndexMap<EntryKey, TrackedEntry>,
}

impl ChangeTracker {
    pub fn get(&self, key: &EntryKey) -> Option<&TrackedEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &EntryKey) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: EntryKey, entry: TrackedEntry) {
        self.entries.insert(key, entry);
    }

    pub fn detach(&mut self, key: &EntryKey) -> Option<TrackedEntry> {
        self.entries.shift_remove(key)
    }

    /// Tracked entries of one table, in insertion order.
    pub fn entries_for<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a EntryKey, &'a TrackedEntry)> + 'a {
        self.entries.iter().filter(move |(key, _)| key.table == table)
    }

    /// Entries with a pending insert, update or delete, in insertion order.
    pub fn pending(&self) -> impl Iterator<Item = (&EntryKey, &TrackedEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state != EntryState::Unchanged)
    }

    pub fn has_changes(&self) -> bool {
        self.pending().next().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Marks every staged change as persisted.
    pub fn accept_all(&mut self) {
        self.entries
            .retain(|_, entry| entry.state != EntryState::Deleted);
        for entry in self.entries.values_mut() {
            entry.state = EntryState::Unchanged;
            entry.original = entry.current.clone();
        }
    }

    /// Drops staged changes: entries without a persisted snapshot (adds and
    /// updates of untracked entities) are detached, everything else is
    /// restored to its original values.
    pub fn reject_all(&mut self) {
        self.entries.retain(|_, entry| {
            entry.state != EntryState::Added && !entry.original.is_empty()
        });
        for entry in self.entries.values_mut() {
            entry.state = EntryState::Unchanged;
            entry.current = entry.original.clone();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeTracker, EntryKey, EntryState, TrackedEntry};
    use crate::model::Value;

    fn key(identity: &str) -> EntryKey {
        EntryKey::new("orders", identity.to_string())
    }

    #[test]
    fn accept_all_drops_deleted_and_snapshots_current() {
        let mut tracker = ChangeTracker::default();
        tracker.insert(key("a"), TrackedEntry::added(vec![Value::from(1)]));
        let mut removed = TrackedEntry::unchanged(vec![Value::from(2)]);
        removed.state = EntryState::Deleted;
        tracker.insert(key("b"), removed);

        assert_eq!(tracker.pending_count(), 2);
        tracker.accept_all();

        assert_eq!(tracker.len(), 1);
        let entry = tracker.get(&key("a")).unwrap();
        assert_eq!(entry.state, EntryState::Unchanged);
        assert_eq!(entry.original, vec![Value::from(1)]);
        assert!(!tracker.has_changes());
    }

    #[test]
    fn reject_all_restores_original_values() {
        let mut tracker = ChangeTracker::default();
        tracker.insert(key("a"), TrackedEntry::added(vec![Value::from(1)]));
        let mut modified = TrackedEntry::unchanged(vec![Value::from("before")]);
        modified.current = vec![Value::from("after")];
        modified.refresh_state();
        assert_eq!(modified.state, EntryState::Modified);
        tracker.insert(key("b"), modified);
        tracker.insert(
            key("c"),
            TrackedEntry {
                state: EntryState::Modified,
                original: Vec::new(),
                current: vec![Value::from("blind")],
            },
        );

        tracker.reject_all();

        assert!(tracker.get(&key("a")).is_none());
        assert!(tracker.get(&key("c")).is_none());
        let entry = tracker.get(&key("b")).unwrap();
        assert_eq!(entry.current, vec![Value::from("before")]);
        assert_eq!(entry.state, EntryState::Unchanged);
    }
}
