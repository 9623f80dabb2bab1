//! The active configuration: which states are currently live.
//!
//! A configuration is a derived projection of the tree and is only ever
//! observed complete: the processor mutates a scratch copy and commits
//! it per phase, so no caller sees a half-exited or half-entered set.

use crate::core::state::{ChildMode, StateId};
use crate::core::tree::StateTree;
use crate::error::ProcessingError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Serializable view of the active leaves as full slash-separated
/// paths, ordered by tree preorder. Stable across runs for identical
/// trees and event streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    pub active_leaves: Vec<String>,
}

/// Set of active states plus the derived leaf list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveConfiguration {
    active: BTreeSet<StateId>,
    leaves: Vec<StateId>,
}

impl ActiveConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, id: StateId) -> bool {
        self.active.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// All active states in id order.
    pub fn active(&self) -> impl Iterator<Item = StateId> + '_ {
        self.active.iter().copied()
    }

    /// Active leaves in tree preorder.
    pub fn leaves(&self) -> &[StateId] {
        &self.leaves
    }

    pub(crate) fn activate(&mut self, id: StateId) {
        self.active.insert(id);
    }

    pub(crate) fn deactivate(&mut self, id: StateId) {
        self.active.remove(&id);
    }

    /// The active child of `parent`, if any. Under an exclusive parent
    /// the audit guarantees there is at most one.
    pub fn active_child(&self, tree: &StateTree, parent: StateId) -> Option<StateId> {
        tree.node(parent)
            .children()
            .iter()
            .copied()
            .find(|&c| self.is_active(c))
    }

    /// Recompute the leaf list after a phase commit.
    pub(crate) fn rebuild_leaves(&mut self, tree: &StateTree) {
        self.leaves = tree
            .preorder()
            .into_iter()
            .filter(|&id| self.is_active(id) && self.active_child(tree, id).is_none())
            .collect();
    }

    pub fn snapshot(&self, tree: &StateTree) -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            active_leaves: self.leaves.iter().map(|&id| tree.path_name(id)).collect(),
        }
    }

    /// Verify the configuration invariants:
    /// every active non-root state has an active parent; an active
    /// exclusive composite has exactly one active child; an active
    /// parallel composite has all regions active; pseudostates and
    /// children of final states are never active.
    pub fn audit(&self, tree: &StateTree) -> Result<(), ProcessingError> {
        if self.active.is_empty() {
            return Ok(());
        }
        if !self.is_active(tree.root()) {
            return Err(ProcessingError::illegal(
                "active configuration does not contain the root",
            ));
        }
        for &id in &self.active {
            let node = tree.node(id);
            if node.kind().is_pseudostate() {
                return Err(ProcessingError::illegal(format!(
                    "pseudostate '{}' is active",
                    node.name()
                )));
            }
            if let Some(parent) = node.parent() {
                if !self.is_active(parent) {
                    return Err(ProcessingError::illegal(format!(
                        "'{}' is active but its parent is not",
                        node.name()
                    )));
                }
            }
            let enterable: Vec<StateId> = node
                .children()
                .iter()
                .copied()
                .filter(|&c| !tree.node(c).kind().is_pseudostate())
                .collect();
            if enterable.is_empty() {
                continue;
            }
            let active_children = enterable.iter().filter(|&&c| self.is_active(c)).count();
            match node.child_mode() {
                ChildMode::Exclusive => {
                    if active_children != 1 {
                        return Err(ProcessingError::illegal(format!(
                            "exclusive composite '{}' has {} active children",
                            node.name(),
                            active_children
                        )));
                    }
                }
                ChildMode::Parallel => {
                    if active_children != enterable.len() {
                        return Err(ProcessingError::illegal(format!(
                            "parallel composite '{}' has inactive regions",
                            node.name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StateKind;

    fn sample_tree() -> (StateTree, StateId, StateId, StateId) {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let a = tree
            .add_node(tree.root(), "a", StateKind::Plain, ChildMode::Exclusive)
            .unwrap();
        let a1 = tree
            .add_node(a, "a1", StateKind::Plain, ChildMode::Exclusive)
            .unwrap();
        let b = tree
            .add_node(tree.root(), "b", StateKind::Plain, ChildMode::Exclusive)
            .unwrap();
        tree.set_initial(tree.root(), a).unwrap();
        tree.set_initial(a, a1).unwrap();
        (tree, a, a1, b)
    }

    #[test]
    fn audit_accepts_complete_configuration() {
        let (tree, a, a1, _) = sample_tree();
        let mut config = ActiveConfiguration::new();
        config.activate(tree.root());
        config.activate(a);
        config.activate(a1);
        config.rebuild_leaves(&tree);

        assert!(config.audit(&tree).is_ok());
        assert_eq!(config.leaves(), &[a1]);
    }

    #[test]
    fn audit_rejects_orphan_active_state() {
        let (tree, _, a1, _) = sample_tree();
        let mut config = ActiveConfiguration::new();
        config.activate(tree.root());
        config.activate(a1);

        assert!(config.audit(&tree).is_err());
    }

    #[test]
    fn audit_rejects_two_active_exclusive_children() {
        let (tree, a, a1, b) = sample_tree();
        let mut config = ActiveConfiguration::new();
        config.activate(tree.root());
        config.activate(a);
        config.activate(a1);
        config.activate(b);

        assert!(config.audit(&tree).is_err());
    }

    #[test]
    fn audit_requires_all_parallel_regions() {
        let mut tree = StateTree::new("root", ChildMode::Parallel);
        let r1 = tree
            .add_node(tree.root(), "r1", StateKind::Plain, ChildMode::Exclusive)
            .unwrap();
        let r2 = tree
            .add_node(tree.root(), "r2", StateKind::Plain, ChildMode::Exclusive)
            .unwrap();

        let mut config = ActiveConfiguration::new();
        config.activate(tree.root());
        config.activate(r1);
        assert!(config.audit(&tree).is_err());

        config.activate(r2);
        assert!(config.audit(&tree).is_ok());
    }

    #[test]
    fn snapshot_lists_leaf_paths_in_preorder() {
        let (tree, a, a1, _) = sample_tree();
        let mut config = ActiveConfiguration::new();
        config.activate(tree.root());
        config.activate(a);
        config.activate(a1);
        config.rebuild_leaves(&tree);

        let snapshot = config.snapshot(&tree);
        assert_eq!(snapshot.active_leaves, vec!["root/a/a1".to_string()]);

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ConfigurationSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn empty_configuration_is_valid() {
        let (tree, ..) = sample_tree();
        let config = ActiveConfiguration::new();
        assert!(config.audit(&tree).is_ok());
        assert!(config.is_empty());
    }
}
