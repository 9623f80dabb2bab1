//! Recorded configurations for history pseudostates.
//!
//! Keyed by the history node's id, not by live references: the store
//! outlives any particular configuration and never pins tree nodes.

use crate::core::state::StateId;
use std::collections::HashMap;

/// What a history pseudostate remembered at the owner's last exit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredConfiguration {
    /// The owner's direct active child.
    Shallow(StateId),
    /// The active leaves under the owner, in tree preorder. Re-entry
    /// reproduces the full nested configuration.
    Deep(Vec<StateId>),
}

/// Per-history-node recorded configurations.
///
/// Empty until the owning composite is exited for the first time;
/// restoring an unrecorded history falls back to its default target,
/// else the owner's default-initial child.
#[derive(Clone, Debug, Default)]
pub struct HistoryStore {
    entries: HashMap<StateId, StoredConfiguration>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what the owner's subtree looked like at exit. Only called
    /// for history nodes owned by a composite inside the exited
    /// subtree; history nodes elsewhere are untouched.
    pub(crate) fn capture(&mut self, history: StateId, stored: StoredConfiguration) {
        self.entries.insert(history, stored);
    }

    pub fn recorded(&self, history: StateId) -> Option<&StoredConfiguration> {
        self.entries.get(&history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_records_last_capture() {
        let mut store = HistoryStore::new();
        let history = StateId(4);
        assert!(store.recorded(history).is_none());

        store.capture(history, StoredConfiguration::Shallow(StateId(2)));
        store.capture(history, StoredConfiguration::Shallow(StateId(3)));
        assert_eq!(
            store.recorded(history),
            Some(&StoredConfiguration::Shallow(StateId(3)))
        );
    }

    #[test]
    fn unrelated_entries_are_untouched() {
        let mut store = HistoryStore::new();
        store.capture(StateId(1), StoredConfiguration::Shallow(StateId(2)));
        store.capture(StateId(5), StoredConfiguration::Deep(vec![StateId(6), StateId(7)]));

        store.capture(StateId(1), StoredConfiguration::Shallow(StateId(3)));
        assert_eq!(
            store.recorded(StateId(5)),
            Some(&StoredConfiguration::Deep(vec![StateId(6), StateId(7)]))
        );
    }
}
