//! State nodes of the statechart tree.
//!
//! A state's kind and composition mode are plain data; anything callable
//! (choice resolvers, guards) lives in side tables keyed by [`StateId`] so
//! the node itself stays inspectable and cheap to clone.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use uuid::Uuid;

/// Stable arena index of a state node.
///
/// Ids are handed out by the tree during construction and stay valid for
/// the life of the machine. They are plain indices: copying one never
/// extends any borrow of the tree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct StateId(pub(crate) usize);

impl StateId {
    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a state's children compose.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ChildMode {
    /// Exactly one child is active at a time.
    Exclusive,
    /// All children (regions) are active simultaneously.
    Parallel,
}

/// Shallow history restores only the immediate child; deep history
/// restores the full nested configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum HistoryKind {
    Shallow,
    Deep,
}

/// Closed set of state kinds.
///
/// Composite-ness is not a kind: a `Plain` or `Data` state becomes a
/// composite by being given children. Pseudostates (`History`, `Choice`)
/// and `Final` states may not have children; `Final` and `History` may
/// not own transitions. Both rules are enforced at construction, so the
/// processor never has to re-check them.
#[derive(Clone, Debug)]
pub enum StateKind {
    Plain,
    Final,
    History {
        kind: HistoryKind,
        /// Sibling entered when the history has nothing recorded.
        /// Falls back to the owner's default-initial child when absent.
        default_target: Option<StateId>,
    },
    Choice,
    Data {
        type_name: &'static str,
        type_id: TypeId,
    },
}

impl StateKind {
    pub fn allows_children(&self) -> bool {
        matches!(self, Self::Plain | Self::Data { .. })
    }

    pub fn allows_transitions(&self) -> bool {
        matches!(self, Self::Plain | Self::Data { .. })
    }

    /// True for kinds that never appear in the active configuration.
    pub fn is_pseudostate(&self) -> bool {
        matches!(self, Self::History { .. } | Self::Choice)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final)
    }

    /// Kind name used in diagnostics and diagram export.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Final => "final",
            Self::History { .. } => "history",
            Self::Choice => "choice",
            Self::Data { .. } => "data",
        }
    }
}

/// One node of the state tree.
///
/// Nodes are owned by the tree arena; parent links are non-owning index
/// back-references, child links are owning index lists in registration
/// order (which is also the deterministic export order).
#[derive(Clone, Debug)]
pub struct StateNode {
    pub(crate) name: String,
    pub(crate) kind: StateKind,
    pub(crate) child_mode: ChildMode,
    pub(crate) parent: Option<StateId>,
    pub(crate) children: Vec<StateId>,
    pub(crate) initial: Option<StateId>,
    /// Identity of an embedded sub-machine whose subtree was absorbed
    /// under this node. Read-only metadata after the transfer.
    pub(crate) submachine: Option<Uuid>,
}

impl StateNode {
    pub(crate) fn new(name: String, kind: StateKind, child_mode: ChildMode) -> Self {
        Self {
            name,
            kind,
            child_mode,
            parent: None,
            children: Vec::new(),
            initial: None,
            submachine: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StateKind {
        &self.kind
    }

    pub fn child_mode(&self) -> ChildMode {
        self.child_mode
    }

    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    pub fn children(&self) -> &[StateId] {
        &self.children
    }

    pub fn initial(&self) -> Option<StateId> {
        self.initial
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_final(&self) -> bool {
        self.kind.is_final()
    }

    pub fn submachine(&self) -> Option<Uuid> {
        self.submachine
    }
}
