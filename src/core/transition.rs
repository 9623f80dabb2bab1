//! Transitions, triggers and the per-state transition table.
//!
//! Guard/direction evaluation is effectful in the Stillwater sense:
//! a direction function is a factory returning a fresh
//! `BoxedEffect<Direction, ProcessingError, Env>` per evaluation, so a
//! guard may await an external decision while the machine stays locked
//! on the in-flight cycle. Direction functions see only the event and
//! the environment; they cannot reach the active configuration.

use crate::core::event::{CoreEvent, Event};
use crate::core::state::StateId;
use crate::error::ProcessingError;
use std::collections::HashMap;
use std::sync::Arc;
use stillwater::effect::BoxedEffect;
use stillwater::prelude::*;

/// Multi-valued guard result: decline, a single target, or a set of
/// targets for parallel-region activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Explicitly decline; evaluation moves on to the next registered
    /// transition of the same source.
    None,
    To(StateId),
    Spread(Vec<StateId>),
}

impl Direction {
    pub fn targets(self) -> Vec<StateId> {
        match self {
            Self::None => Vec::new(),
            Self::To(id) => vec![id],
            Self::Spread(ids) => ids,
        }
    }
}

/// Event-type predicate of a transition.
pub type EventMatcher<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Effectful direction function; evaluated only while the source state
/// is in the active configuration.
pub type DirectionFn<E, Env> =
    Arc<dyn Fn(&E) -> BoxedEffect<Direction, ProcessingError, Env> + Send + Sync>;

/// Where a matched transition goes.
pub(crate) enum TransitionKind<E: Event, Env> {
    /// Fixed target, known at build time (and to diagram exporters).
    Static(StateId),
    /// Guard/direction function decides per event.
    Conditional(DirectionFn<E, Env>),
}

impl<E: Event, Env> Clone for TransitionKind<E, Env> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(id) => Self::Static(*id),
            Self::Conditional(f) => Self::Conditional(Arc::clone(f)),
        }
    }
}

/// What fires a transition. Completion rules are a separate shape so a
/// conditional direction can never observe a completion event: the
/// combination is unrepresentable rather than runtime-rejected.
pub(crate) enum Rule<E: Event, Env> {
    OnEvent {
        matcher: EventMatcher<E>,
        kind: TransitionKind<E, Env>,
    },
    OnCompletion {
        of: StateId,
        target: StateId,
    },
}

impl<E: Event, Env> Clone for Rule<E, Env> {
    fn clone(&self) -> Self {
        match self {
            Self::OnEvent { matcher, kind } => Self::OnEvent {
                matcher: Arc::clone(matcher),
                kind: kind.clone(),
            },
            Self::OnCompletion { of, target } => Self::OnCompletion {
                of: *of,
                target: *target,
            },
        }
    }
}

/// A registered transition. Owned by its source state's slot in the
/// table; registration order is evaluation order.
pub struct Transition<E: Event, Env> {
    pub(crate) source: StateId,
    pub(crate) rule: Rule<E, Env>,
    pub(crate) label: Option<String>,
}

impl<E: Event, Env> Clone for Transition<E, Env> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            rule: self.rule.clone(),
            label: self.label.clone(),
        }
    }
}

impl<E: Event, Env> Transition<E, Env> {
    pub fn source(&self) -> StateId {
        self.source
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Remap every state id through `f` (sub-machine absorption).
    pub(crate) fn remap(&mut self, f: impl Fn(StateId) -> StateId) {
        self.source = f(self.source);
        match &mut self.rule {
            Rule::OnEvent { kind, .. } => {
                if let TransitionKind::Static(target) = kind {
                    *target = f(*target);
                }
            }
            Rule::OnCompletion { of, target } => {
                *of = f(*of);
                *target = f(*target);
            }
        }
    }
}

/// Outcome of matching one state against one event.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum MatchOutcome {
    /// No registered transition reacted to the event type.
    NoMatch,
    /// A transition matched the event type but every direction declined.
    /// The event is consumed; listeners are notified; nothing changes.
    Declined,
    /// A transition fired.
    Targets {
        targets: Vec<StateId>,
        label: Option<String>,
    },
}

/// Per-state registered transitions.
pub struct TransitionTable<E: Event, Env> {
    by_state: HashMap<StateId, Vec<Transition<E, Env>>>,
}

impl<E: Event, Env> Default for TransitionTable<E, Env> {
    fn default() -> Self {
        Self {
            by_state: HashMap::new(),
        }
    }
}

impl<E: Event, Env: Clone + Send + Sync + 'static> TransitionTable<E, Env> {
    pub fn new() -> Self {
        Self {
            by_state: HashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, transition: Transition<E, Env>) {
        self.by_state
            .entry(transition.source)
            .or_default()
            .push(transition);
    }

    pub fn transitions_of(&self, state: StateId) -> &[Transition<E, Env>] {
        self.by_state.get(&state).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn merge(&mut self, other: TransitionTable<E, Env>) {
        for (_, transitions) in other.by_state {
            for transition in transitions {
                self.register(transition);
            }
        }
    }

    pub(crate) fn remap(&mut self, f: impl Fn(StateId) -> StateId) {
        let old = std::mem::take(&mut self.by_state);
        for (_, transitions) in old {
            for mut transition in transitions {
                transition.remap(&f);
                self.register(transition);
            }
        }
    }

    /// Evaluate `state`'s transitions against `event` in registration
    /// order. First `Targets` wins; a matched-but-declined set of
    /// directions yields `Declined`.
    pub(crate) async fn match_state(
        &self,
        state: StateId,
        event: &CoreEvent<E>,
        env: &Env,
    ) -> Result<MatchOutcome, ProcessingError> {
        let Some(transitions) = self.by_state.get(&state) else {
            return Ok(MatchOutcome::NoMatch);
        };

        let mut matched = false;
        for transition in transitions {
            match (&transition.rule, event) {
                (Rule::OnEvent { matcher, kind }, CoreEvent::External(e)) if matcher(e) => {
                    matched = true;
                    match kind {
                        TransitionKind::Static(target) => {
                            return Ok(MatchOutcome::Targets {
                                targets: vec![*target],
                                label: transition.label.clone(),
                            });
                        }
                        TransitionKind::Conditional(direction) => {
                            let resolved = direction(e).run(env).await?;
                            match resolved {
                                Direction::None => continue,
                                other => {
                                    return Ok(MatchOutcome::Targets {
                                        targets: other.targets(),
                                        label: transition.label.clone(),
                                    });
                                }
                            }
                        }
                    }
                }
                (Rule::OnCompletion { of, target }, CoreEvent::Completed(done)) if of == done => {
                    return Ok(MatchOutcome::Targets {
                        targets: vec![*target],
                        label: transition.label.clone(),
                    });
                }
                _ => {}
            }
        }

        Ok(if matched {
            MatchOutcome::Declined
        } else {
            MatchOutcome::NoMatch
        })
    }
}
