//! Read-only structural introspection of a built machine.
//!
//! Everything here is derived from the frozen tree and transition
//! table; none of it touches the runtime configuration. The diagram
//! exporters in [`crate::export`] are built on these views.

use serde::{Deserialize, Serialize};

use crate::core::event::Event;
use crate::core::state::{StateId, StateNode};
use crate::core::transition::{Rule, TransitionKind};
use crate::machine::Machine;

/// What fires a registered transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerInfo {
    /// An external event accepted by the transition's matcher.
    Event,
    /// The named composite's children all reaching final states.
    Completion { of: StateId },
}

/// Where a registered transition goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetInfo {
    /// Fixed target known at build time.
    Static(StateId),
    /// A direction function decides per event; the target is not
    /// statically known.
    Conditional,
}

/// Structural view of one registered transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub source: StateId,
    pub trigger: TriggerInfo,
    pub target: TargetInfo,
    pub label: Option<String>,
}

impl<E: Event, Env: Clone + Send + Sync + 'static> Machine<E, Env> {
    /// Every state id in deterministic tree preorder.
    pub fn states(&self) -> Vec<StateId> {
        self.tree.preorder()
    }

    /// Full slash-separated path of a state.
    pub fn path_name(&self, state: StateId) -> String {
        self.tree.path_name(state)
    }

    /// Structural views of the transitions registered on `state`, in
    /// registration (= evaluation) order.
    pub fn transitions_of(&self, state: StateId) -> Vec<TransitionInfo> {
        self.table
            .transitions_of(state)
            .iter()
            .map(|t| {
                let (trigger, target) = match &t.rule {
                    Rule::OnEvent { kind, .. } => (
                        TriggerInfo::Event,
                        match kind {
                            TransitionKind::Static(id) => TargetInfo::Static(*id),
                            TransitionKind::Conditional(_) => TargetInfo::Conditional,
                        },
                    ),
                    Rule::OnCompletion { of, target } => (
                        TriggerInfo::Completion { of: *of },
                        TargetInfo::Static(*target),
                    ),
                };
                TransitionInfo {
                    source: t.source(),
                    trigger,
                    target,
                    label: t.label().map(str::to_string),
                }
            })
            .collect()
    }

    /// Every registered transition, grouped by source in tree preorder.
    pub fn all_transitions(&self) -> Vec<TransitionInfo> {
        self.states()
            .into_iter()
            .flat_map(|state| self.transitions_of(state))
            .collect()
    }

    /// Visit every node in preorder.
    pub fn walk(&self, mut visit: impl FnMut(StateId, &StateNode)) {
        for id in self.tree.preorder() {
            visit(id, self.tree.node(id));
        }
    }
}
