//! Error taxonomy.
//!
//! Construction problems ([`StructureError`]) are misuse of the builder
//! and surface before a machine exists. Runtime problems
//! ([`ProcessingError`]) surface from `start`/`process_event`; none of
//! them destroy the machine, the configuration stays at the last fully
//! committed phase.

use crate::core::state::StateId;
use thiserror::Error;
use uuid::Uuid;

/// Structural misuse detected while building a machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("'{parent}' is a {kind} state and cannot have children")]
    ChildrenNotAllowed { parent: String, kind: &'static str },

    #[error("'{name}' is a {kind} state and cannot own transitions")]
    TransitionsNotAllowed { name: String, kind: &'static str },

    #[error("'{parent}' already has a child named '{name}'")]
    DuplicateName { parent: String, name: String },

    #[error("'{parent}' already has a default-initial child")]
    DuplicateInitial { parent: String },

    #[error("'{parent}' is parallel; all regions enter together, no initial child applies")]
    InitialOnParallel { parent: String },

    #[error("'{child}' is not a child of '{parent}'")]
    NotAChild { parent: String, child: String },

    #[error("pseudostate '{name}' cannot be a default-initial child")]
    PseudostateInitial { name: String },

    #[error("default target of history state '{name}' must be a sibling")]
    ForeignHistoryDefault { name: String },

    #[error("exclusive composite '{name}' has children but no default-initial child")]
    MissingInitial { name: String },

    #[error("unknown state id {0:?}")]
    UnknownState(StateId),
}

/// Runtime failure of the event cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("machine {id} is destroyed")]
    MachineDestroyed { id: Uuid },

    #[error("transitions from '{first}' and '{second}' fired for overlapping regions")]
    Conflict { first: String, second: String },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("completion events did not settle within {limit} rounds")]
    InfiniteCompletionLoop { limit: usize },

    #[error("callback failed: {0}")]
    Callback(String),
}

impl ProcessingError {
    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = StructureError::DuplicateName {
            parent: "root".into(),
            name: "a".into(),
        };
        assert_eq!(err.to_string(), "'root' already has a child named 'a'");

        let err = ProcessingError::InfiniteCompletionLoop { limit: 32 };
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn illegal_helper_wraps_message() {
        let err = ProcessingError::illegal("data read while inactive");
        assert!(matches!(err, ProcessingError::IllegalState(_)));
    }
}
