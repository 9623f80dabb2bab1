//! Arena-backed state tree.
//!
//! The tree owns every node; parent links are index back-references, so
//! the shape can be cyclic in references without being cyclic in
//! ownership. Shape is frozen once the machine is built: all mutating
//! methods are crate-private and only reachable from the builder.

use crate::core::state::{ChildMode, StateId, StateKind, StateNode};
use crate::error::StructureError;
use uuid::Uuid;

/// Mapping from a donor tree's ids into the absorbing tree.
///
/// Absorption appends the donor arena wholesale, so the mapping is a
/// constant offset.
#[derive(Clone, Copy, Debug)]
pub struct SubtreeHandle {
    pub root: StateId,
    offset: usize,
}

impl SubtreeHandle {
    /// Translate an id minted by the donor tree.
    pub fn map(&self, donor: StateId) -> StateId {
        StateId(donor.0 + self.offset)
    }
}

/// The state tree arena.
#[derive(Clone, Debug)]
pub struct StateTree {
    nodes: Vec<StateNode>,
    root: StateId,
}

impl StateTree {
    /// Create a tree holding only the root composite.
    pub fn new(root_name: impl Into<String>, child_mode: ChildMode) -> Self {
        let root = StateNode::new(root_name.into(), StateKind::Plain, child_mode);
        Self {
            nodes: vec![root],
            root: StateId(0),
        }
    }

    pub fn root(&self) -> StateId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: StateId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: StateId) -> &str {
        self.node(id).name()
    }

    /// Slash-separated path from the root, used in snapshots and export.
    pub fn path_name(&self, id: StateId) -> String {
        let mut parts = vec![self.name(id).to_string()];
        let mut cursor = id;
        while let Some(parent) = self.node(cursor).parent {
            parts.push(self.name(parent).to_string());
            cursor = parent;
        }
        parts.reverse();
        parts.join("/")
    }

    fn check_id(&self, id: StateId) -> Result<(), StructureError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(StructureError::UnknownState(id))
        }
    }

    /// Add a node under `parent`.
    ///
    /// Rejects children under `Final`/`History`/`Choice`, duplicate
    /// sibling names, and history default targets that are not siblings.
    pub(crate) fn add_node(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
        kind: StateKind,
        child_mode: ChildMode,
    ) -> Result<StateId, StructureError> {
        self.check_id(parent)?;
        let name = name.into();
        let parent_node = self.node(parent);
        if !parent_node.kind.allows_children() {
            return Err(StructureError::ChildrenNotAllowed {
                parent: parent_node.name.clone(),
                kind: parent_node.kind.describe(),
            });
        }
        if parent_node.children.iter().any(|&c| self.name(c) == name) {
            return Err(StructureError::DuplicateName {
                parent: parent_node.name.clone(),
                name,
            });
        }
        if let StateKind::History {
            default_target: Some(target),
            ..
        } = kind
        {
            self.check_id(target)?;
            if self.node(target).parent != Some(parent) {
                return Err(StructureError::ForeignHistoryDefault { name });
            }
        }

        let id = StateId(self.nodes.len());
        let mut node = StateNode::new(name, kind, child_mode);
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Mark `child` as the default-initial child of `parent`.
    pub(crate) fn set_initial(
        &mut self,
        parent: StateId,
        child: StateId,
    ) -> Result<(), StructureError> {
        self.check_id(parent)?;
        self.check_id(child)?;
        let parent_node = self.node(parent);
        if self.node(child).parent != Some(parent) {
            return Err(StructureError::NotAChild {
                parent: parent_node.name.clone(),
                child: self.name(child).to_string(),
            });
        }
        if parent_node.child_mode == ChildMode::Parallel {
            return Err(StructureError::InitialOnParallel {
                parent: parent_node.name.clone(),
            });
        }
        if parent_node.initial.is_some() {
            return Err(StructureError::DuplicateInitial {
                parent: parent_node.name.clone(),
            });
        }
        if self.node(child).kind.is_pseudostate() {
            return Err(StructureError::PseudostateInitial {
                name: self.name(child).to_string(),
            });
        }
        self.nodes[parent.0].initial = Some(child);
        Ok(())
    }

    pub(crate) fn set_submachine(&mut self, id: StateId, machine_id: Uuid) {
        self.nodes[id.0].submachine = Some(machine_id);
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: StateId) -> Vec<StateId> {
        let mut out = Vec::new();
        let mut cursor = id;
        while let Some(parent) = self.node(cursor).parent {
            out.push(parent);
            cursor = parent;
        }
        out
    }

    pub fn depth(&self, id: StateId) -> usize {
        self.ancestors(id).len()
    }

    /// Strict descendant check: a node is not a descendant of itself.
    pub fn is_descendant_of(&self, a: StateId, b: StateId) -> bool {
        let mut cursor = a;
        while let Some(parent) = self.node(cursor).parent {
            if parent == b {
                return true;
            }
            cursor = parent;
        }
        false
    }

    /// Lowest common ancestor; `lca(a, a) == a`.
    pub fn lowest_common_ancestor(&self, a: StateId, b: StateId) -> StateId {
        let mut chain_a = vec![a];
        chain_a.extend(self.ancestors(a));
        let mut cursor = b;
        loop {
            if chain_a.contains(&cursor) {
                return cursor;
            }
            match self.node(cursor).parent {
                Some(parent) => cursor = parent,
                // Both ids share the root, so the walk always terminates
                // before this point; the root is the final answer.
                None => return self.root,
            }
        }
    }

    /// Deterministic initial descendant chain entered when `id` is
    /// activated with defaults: `id` itself, then the default-initial
    /// child of each exclusive composite and every region of each
    /// parallel composite, recursively. Pseudostate children are never
    /// part of a default activation.
    pub fn resolve_default_path(&self, id: StateId) -> Result<Vec<StateId>, StructureError> {
        let mut out = Vec::new();
        self.default_path_into(id, &mut out)?;
        Ok(out)
    }

    fn default_path_into(&self, id: StateId, out: &mut Vec<StateId>) -> Result<(), StructureError> {
        out.push(id);
        let node = self.node(id);
        if node.children.is_empty() {
            return Ok(());
        }
        match node.child_mode {
            ChildMode::Exclusive => {
                let initial = node.initial.ok_or_else(|| StructureError::MissingInitial {
                    name: node.name.clone(),
                })?;
                self.default_path_into(initial, out)
            }
            ChildMode::Parallel => {
                for &child in &node.children {
                    if !self.node(child).kind.is_pseudostate() {
                        self.default_path_into(child, out)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Depth-first preorder over the whole tree; children in
    /// registration order. The ordering is stable across runs, which is
    /// what makes exported diagrams reproducible.
    pub fn preorder(&self) -> Vec<StateId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for &child in self.node(id).children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Verify the frozen shape before a machine is built: every
    /// exclusive composite with enterable children must have a
    /// default-initial child.
    pub fn validate(&self) -> Result<(), StructureError> {
        for node in &self.nodes {
            let enterable = node
                .children
                .iter()
                .any(|&c| !self.node(c).kind.is_pseudostate());
            if enterable && node.child_mode == ChildMode::Exclusive && node.initial.is_none() {
                return Err(StructureError::MissingInitial {
                    name: node.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Absorb `donor` under `parent`, transferring exclusive ownership of
    /// its entire subtree. Donor ids translate through the returned
    /// handle.
    pub(crate) fn absorb(
        &mut self,
        parent: StateId,
        donor: StateTree,
    ) -> Result<SubtreeHandle, StructureError> {
        self.check_id(parent)?;
        let parent_node = self.node(parent);
        if !parent_node.kind.allows_children() {
            return Err(StructureError::ChildrenNotAllowed {
                parent: parent_node.name.clone(),
                kind: parent_node.kind.describe(),
            });
        }
        let donor_root_name = donor.node(donor.root).name.clone();
        if parent_node
            .children
            .iter()
            .any(|&c| self.name(c) == donor_root_name)
        {
            return Err(StructureError::DuplicateName {
                parent: parent_node.name.clone(),
                name: donor_root_name,
            });
        }

        let offset = self.nodes.len();
        let handle = SubtreeHandle {
            root: StateId(donor.root.0 + offset),
            offset,
        };
        for mut node in donor.nodes {
            node.parent = node.parent.map(|p| StateId(p.0 + offset));
            for child in &mut node.children {
                *child = StateId(child.0 + offset);
            }
            node.initial = node.initial.map(|i| StateId(i.0 + offset));
            if let StateKind::History {
                default_target: Some(target),
                ..
            } = &mut node.kind
            {
                *target = StateId(target.0 + offset);
            }
            self.nodes.push(node);
        }
        self.nodes[handle.root.0].parent = Some(parent);
        self.nodes[parent.0].children.push(handle.root);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::HistoryKind;

    fn plain(tree: &mut StateTree, parent: StateId, name: &str) -> StateId {
        tree.add_node(parent, name, StateKind::Plain, ChildMode::Exclusive)
            .unwrap()
    }

    #[test]
    fn add_node_links_parent_and_child() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        let a = plain(&mut tree, root, "a");
        assert_eq!(tree.node(a).parent(), Some(root));
        assert_eq!(tree.node(root).children(), &[a]);
    }

    #[test]
    fn rejects_children_under_final() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let fin = tree
            .add_node(tree.root(), "done", StateKind::Final, ChildMode::Exclusive)
            .unwrap();
        let err = tree
            .add_node(fin, "oops", StateKind::Plain, ChildMode::Exclusive)
            .unwrap_err();
        assert!(matches!(err, StructureError::ChildrenNotAllowed { .. }));
    }

    #[test]
    fn rejects_duplicate_sibling_names() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        plain(&mut tree, root, "a");
        let err = tree
            .add_node(tree.root(), "a", StateKind::Plain, ChildMode::Exclusive)
            .unwrap_err();
        assert!(matches!(err, StructureError::DuplicateName { .. }));
    }

    #[test]
    fn rejects_second_default_initial() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        let a = plain(&mut tree, root, "a");
        let b = plain(&mut tree, root, "b");
        tree.set_initial(root, a).unwrap();
        let err = tree.set_initial(root, b).unwrap_err();
        assert!(matches!(err, StructureError::DuplicateInitial { .. }));
    }

    #[test]
    fn rejects_initial_on_parallel() {
        let mut tree = StateTree::new("root", ChildMode::Parallel);
        let root = tree.root();
        let a = plain(&mut tree, root, "a");
        let err = tree.set_initial(root, a).unwrap_err();
        assert!(matches!(err, StructureError::InitialOnParallel { .. }));
    }

    #[test]
    fn history_default_must_be_sibling() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        let a = plain(&mut tree, root, "a");
        let inner = plain(&mut tree, a, "inner");
        let err = tree
            .add_node(
                tree.root(),
                "hist",
                StateKind::History {
                    kind: HistoryKind::Shallow,
                    default_target: Some(inner),
                },
                ChildMode::Exclusive,
            )
            .unwrap_err();
        assert!(matches!(err, StructureError::ForeignHistoryDefault { .. }));
    }

    #[test]
    fn ancestry_queries() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        let a = plain(&mut tree, root, "a");
        let b = plain(&mut tree, a, "b");
        let c = plain(&mut tree, a, "c");
        let d = plain(&mut tree, b, "d");

        assert_eq!(tree.ancestors(d), vec![b, a, tree.root()]);
        assert!(tree.is_descendant_of(d, a));
        assert!(!tree.is_descendant_of(a, d));
        assert!(!tree.is_descendant_of(a, a));
        assert_eq!(tree.lowest_common_ancestor(d, c), a);
        assert_eq!(tree.lowest_common_ancestor(d, b), b);
        assert_eq!(tree.lowest_common_ancestor(a, a), a);
        assert_eq!(tree.depth(d), 3);
        assert_eq!(tree.path_name(d), "root/a/b/d");
    }

    #[test]
    fn default_path_recurses_into_parallel_regions() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let par = tree
            .add_node(tree.root(), "par", StateKind::Plain, ChildMode::Parallel)
            .unwrap();
        tree.set_initial(tree.root(), par).unwrap();
        let r1 = plain(&mut tree, par, "r1");
        let r2 = plain(&mut tree, par, "r2");
        let r1a = plain(&mut tree, r1, "r1a");
        plain(&mut tree, r1, "r1b");
        let r2a = plain(&mut tree, r2, "r2a");
        tree.set_initial(r1, r1a).unwrap();
        tree.set_initial(r2, r2a).unwrap();

        let path = tree.resolve_default_path(tree.root()).unwrap();
        assert_eq!(path, vec![tree.root(), par, r1, r1a, r2, r2a]);
    }

    #[test]
    fn default_path_requires_initial() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        plain(&mut tree, root, "a");
        let err = tree.resolve_default_path(tree.root()).unwrap_err();
        assert!(matches!(err, StructureError::MissingInitial { .. }));
        assert!(tree.validate().is_err());
    }

    #[test]
    fn preorder_is_registration_order() {
        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        let a = plain(&mut tree, root, "a");
        let b = plain(&mut tree, root, "b");
        let a1 = plain(&mut tree, a, "a1");
        assert_eq!(tree.preorder(), vec![root, a, a1, b]);
    }

    #[test]
    fn absorb_reindexes_donor_subtree() {
        let mut donor = StateTree::new("sub", ChildMode::Exclusive);
        let donor_root = donor.root();
        let donor_a = plain(&mut donor, donor_root, "a");
        donor.set_initial(donor_root, donor_a).unwrap();

        let mut tree = StateTree::new("root", ChildMode::Exclusive);
        let root = tree.root();
        let slot = plain(&mut tree, root, "slot");
        let handle = tree.absorb(slot, donor).unwrap();

        assert_eq!(tree.node(handle.root).name(), "sub");
        assert_eq!(tree.node(handle.root).parent(), Some(slot));
        let mapped_a = handle.map(donor_a);
        assert_eq!(tree.node(mapped_a).name(), "a");
        assert_eq!(tree.node(handle.root).initial(), Some(mapped_a));
        assert_eq!(tree.path_name(mapped_a), "root/slot/sub/a");
    }
}
