//! Fluent construction of machines.
//!
//! The builder is the only place the tree shape is mutable. Structural
//! rules (who may have children, who may own transitions, sibling name
//! uniqueness, initial-child constraints) are enforced here, so a
//! successfully built machine never re-checks them at runtime.
//!
//! # Example
//!
//! ```rust
//! use trellis::builder::MachineBuilder;
//! use trellis::core::Event;
//!
//! #[derive(Clone, Debug)]
//! enum DoorEvent {
//!     Open,
//!     Close,
//! }
//!
//! impl Event for DoorEvent {
//!     fn label(&self) -> &str {
//!         match self {
//!             Self::Open => "Open",
//!             Self::Close => "Close",
//!         }
//!     }
//! }
//!
//! # fn main() -> Result<(), trellis::error::StructureError> {
//! let mut builder: MachineBuilder<DoorEvent, ()> = MachineBuilder::new("door");
//! let closed = builder.state(builder.root(), "closed")?;
//! let open = builder.state(builder.root(), "open")?;
//! builder.initial(builder.root(), closed)?;
//! builder.transition(closed, open, |e| matches!(e, DoorEvent::Open), Some("open"))?;
//! builder.transition(open, closed, |e| matches!(e, DoorEvent::Close), Some("close"))?;
//! let machine = builder.build()?;
//! assert!(!machine.is_finished());
//! # Ok(())
//! # }
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use stillwater::prelude::*;
use uuid::Uuid;

use crate::core::event::{Cause, Event};
use crate::core::state::{ChildMode, HistoryKind, StateId, StateKind};
use crate::core::transition::{
    Direction, DirectionFn, Rule, Transition, TransitionKind, TransitionTable,
};
use crate::core::tree::{StateTree, SubtreeHandle};
use crate::error::{ProcessingError, StructureError};
use crate::listener::{ListenerFn, ListenerRegistry, Notification};
use crate::machine::{ChoiceFn, Machine, PendingPolicy};

/// Builder of a single machine (or of a sub-machine to embed).
pub struct MachineBuilder<E: Event, Env: Clone + Send + Sync + 'static> {
    tree: StateTree,
    table: TransitionTable<E, Env>,
    choices: HashMap<StateId, ChoiceFn<E, Env>>,
    listeners: ListenerRegistry<E, Env>,
    policy: PendingPolicy,
}

impl<E: Event, Env: Clone + Send + Sync + 'static> MachineBuilder<E, Env> {
    /// A builder whose root composes its children exclusively.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self::with_root_mode(root_name, ChildMode::Exclusive)
    }

    /// A builder whose root's children are parallel regions.
    pub fn new_parallel(root_name: impl Into<String>) -> Self {
        Self::with_root_mode(root_name, ChildMode::Parallel)
    }

    fn with_root_mode(root_name: impl Into<String>, mode: ChildMode) -> Self {
        Self {
            tree: StateTree::new(root_name, mode),
            table: TransitionTable::new(),
            choices: HashMap::new(),
            listeners: ListenerRegistry::new(),
            policy: PendingPolicy::Queue,
        }
    }

    pub fn root(&self) -> StateId {
        self.tree.root()
    }

    /// Add a plain state whose children (if any) compose exclusively.
    pub fn state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId, StructureError> {
        self.tree
            .add_node(parent, name, StateKind::Plain, ChildMode::Exclusive)
    }

    /// Add a plain state whose children are parallel regions.
    pub fn parallel_state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId, StructureError> {
        self.tree
            .add_node(parent, name, StateKind::Plain, ChildMode::Parallel)
    }

    /// Add a final state. Entering it marks its parent's region done;
    /// once every region of a composite is done, the composite emits a
    /// completion event.
    pub fn final_state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId, StructureError> {
        self.tree
            .add_node(parent, name, StateKind::Final, ChildMode::Exclusive)
    }

    /// Add a data state carrying a `T` payload while active. The state
    /// only receives its payload as the direct target of a transition
    /// whose event carries a `T`.
    pub fn data_state<T: Send + Sync + 'static>(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId, StructureError> {
        self.tree.add_node(
            parent,
            name,
            StateKind::Data {
                type_name: std::any::type_name::<T>(),
                type_id: TypeId::of::<T>(),
            },
            ChildMode::Exclusive,
        )
    }

    /// Add a history pseudostate remembering its parent's configuration
    /// at exit. `default_target` must be a sibling; when absent, an
    /// unrecorded history falls back to the parent's default-initial
    /// child.
    pub fn history_state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
        kind: HistoryKind,
        default_target: Option<StateId>,
    ) -> Result<StateId, StructureError> {
        self.tree.add_node(
            parent,
            name,
            StateKind::History {
                kind,
                default_target,
            },
            ChildMode::Exclusive,
        )
    }

    /// Add a choice pseudostate. A transition targeting it lands on
    /// whatever the resolver returns, atomically within that
    /// transition.
    pub fn choice_state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
        resolver: ChoiceFn<E, Env>,
    ) -> Result<StateId, StructureError> {
        let id = self
            .tree
            .add_node(parent, name, StateKind::Choice, ChildMode::Exclusive)?;
        self.choices.insert(id, resolver);
        Ok(id)
    }

    /// [`Self::choice_state`] with a synchronous resolver.
    pub fn choice_state_fn<F>(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
        resolver: F,
    ) -> Result<StateId, StructureError>
    where
        F: Fn(&Cause<E>) -> Result<StateId, ProcessingError> + Send + Sync + 'static,
    {
        self.choice_state(
            parent,
            name,
            Arc::new(move |cause| match resolver(cause) {
                Ok(target) => pure(target).boxed(),
                Err(err) => fail(err).boxed(),
            }),
        )
    }

    /// Mark `child` as the default-initial child of `parent`.
    pub fn initial(&mut self, parent: StateId, child: StateId) -> Result<(), StructureError> {
        self.tree.set_initial(parent, child)
    }

    fn check_transition_source(&self, source: StateId) -> Result<(), StructureError> {
        self.check_known(source)?;
        let node = self.tree.node(source);
        if !node.kind().allows_transitions() {
            return Err(StructureError::TransitionsNotAllowed {
                name: node.name().to_string(),
                kind: node.kind().describe(),
            });
        }
        Ok(())
    }

    fn check_known(&self, id: StateId) -> Result<(), StructureError> {
        if id.index() < self.tree.len() {
            Ok(())
        } else {
            Err(StructureError::UnknownState(id))
        }
    }

    /// Register a transition with a fixed target. `matcher` is the
    /// event-type predicate; transitions of one source are evaluated in
    /// registration order.
    pub fn transition<M>(
        &mut self,
        source: StateId,
        target: StateId,
        matcher: M,
        label: Option<&str>,
    ) -> Result<(), StructureError>
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.check_transition_source(source)?;
        self.check_known(target)?;
        self.table.register(Transition {
            source,
            rule: Rule::OnEvent {
                matcher: Arc::new(matcher),
                kind: TransitionKind::Static(target),
            },
            label: label.map(str::to_string),
        });
        Ok(())
    }

    /// Register a conditional transition: when `matcher` accepts the
    /// event, `direction` decides per event whether to decline, go to
    /// one target, or spread over several.
    pub fn transition_when<M, D>(
        &mut self,
        source: StateId,
        matcher: M,
        direction: D,
        label: Option<&str>,
    ) -> Result<(), StructureError>
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
        D: Fn(&E) -> stillwater::effect::BoxedEffect<Direction, ProcessingError, Env>
            + Send
            + Sync
            + 'static,
    {
        self.check_transition_source(source)?;
        let direction: DirectionFn<E, Env> = Arc::new(direction);
        self.table.register(Transition {
            source,
            rule: Rule::OnEvent {
                matcher: Arc::new(matcher),
                kind: TransitionKind::Conditional(direction),
            },
            label: label.map(str::to_string),
        });
        Ok(())
    }

    /// [`Self::transition_when`] with a synchronous direction function.
    pub fn transition_when_fn<M, D>(
        &mut self,
        source: StateId,
        matcher: M,
        direction: D,
        label: Option<&str>,
    ) -> Result<(), StructureError>
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
        D: Fn(&E) -> Result<Direction, ProcessingError> + Send + Sync + 'static,
    {
        self.transition_when(
            source,
            matcher,
            move |event| match direction(event) {
                Ok(dir) => pure(dir).boxed(),
                Err(err) => fail(err).boxed(),
            },
            label,
        )
    }

    /// Register a completion transition: when every region of `of`
    /// reaches a final state, the machine moves to `target`. Completion
    /// targets are always static; there is no direction function to
    /// consult.
    pub fn on_completion(
        &mut self,
        of: StateId,
        target: StateId,
        label: Option<&str>,
    ) -> Result<(), StructureError> {
        self.check_transition_source(of)?;
        self.check_known(target)?;
        self.table.register(Transition {
            source: of,
            rule: Rule::OnCompletion { of, target },
            label: label.map(str::to_string),
        });
        Ok(())
    }

    /// Subscribe an effectful listener to every notification.
    pub fn listen(&mut self, listener: ListenerFn<E, Env>) -> &mut Self {
        self.listeners.subscribe(listener);
        self
    }

    /// Subscribe a synchronous listener.
    pub fn listen_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Notification<E>) -> Result<(), ProcessingError> + Send + Sync + 'static,
    {
        self.listeners.subscribe_fn(f);
        self
    }

    /// Register a dedicated handler for ignored events.
    pub fn on_ignored(&mut self, handler: ListenerFn<E, Env>) -> &mut Self {
        self.listeners.on_ignored(handler);
        self
    }

    pub fn on_ignored_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Notification<E>) -> Result<(), ProcessingError> + Send + Sync + 'static,
    {
        self.listeners.on_ignored_fn(f);
        self
    }

    /// Policy for events submitted through the postbox while a cycle is
    /// in flight. Defaults to FIFO queueing.
    pub fn pending_policy(&mut self, policy: PendingPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Embed another builder's whole chart under `parent`, transferring
    /// exclusive ownership of its subtree. The donor's ids translate
    /// through the returned handle; its transitions, choice resolvers
    /// and listeners come along.
    pub fn embed(
        &mut self,
        parent: StateId,
        sub: MachineBuilder<E, Env>,
    ) -> Result<SubtreeHandle, StructureError> {
        let MachineBuilder {
            tree,
            mut table,
            choices,
            listeners,
            policy: _,
        } = sub;
        let handle = self.tree.absorb(parent, tree)?;
        table.remap(|id| handle.map(id));
        self.table.merge(table);
        for (id, resolver) in choices {
            self.choices.insert(handle.map(id), resolver);
        }
        self.listeners.merge(listeners);
        self.tree.set_submachine(handle.root, Uuid::new_v4());
        Ok(handle)
    }

    /// Freeze the shape and produce a machine in the `Created`
    /// lifecycle stage. Fails when an exclusive composite with
    /// enterable children lacks a default-initial child.
    pub fn build(self) -> Result<Machine<E, Env>, StructureError> {
        self.tree.validate()?;
        Ok(Machine::from_parts(
            self.tree,
            self.table,
            self.choices,
            self.listeners,
            self.policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    enum Ev {
        Go,
    }

    impl Event for Ev {
        fn label(&self) -> &str {
            "Go"
        }
    }

    #[test]
    fn build_rejects_missing_initial() {
        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
        builder.state(builder.root(), "a").unwrap();
        let err = builder.build().err().unwrap();
        assert!(matches!(err, StructureError::MissingInitial { .. }));
    }

    #[test]
    fn transitions_rejected_on_final_and_history() {
        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
        let a = builder.state(builder.root(), "a").unwrap();
        let done = builder.final_state(builder.root(), "done").unwrap();
        let hist = builder
            .history_state(builder.root(), "hist", HistoryKind::Shallow, None)
            .unwrap();
        builder.initial(builder.root(), a).unwrap();

        let err = builder
            .transition(done, a, |_| true, None)
            .unwrap_err();
        assert!(matches!(err, StructureError::TransitionsNotAllowed { .. }));

        let err = builder
            .transition(hist, a, |_| true, None)
            .unwrap_err();
        assert!(matches!(err, StructureError::TransitionsNotAllowed { .. }));
    }

    #[test]
    fn transition_targets_must_exist() {
        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
        let a = builder.state(builder.root(), "a").unwrap();
        builder.initial(builder.root(), a).unwrap();

        let err = builder
            .transition(a, StateId(99), |_| true, None)
            .unwrap_err();
        assert!(matches!(err, StructureError::UnknownState(_)));
    }

    #[test]
    fn pseudostates_cannot_be_initial() {
        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
        let a = builder.state(builder.root(), "a").unwrap();
        builder.state(a, "inner").unwrap();
        let hist = builder
            .history_state(a, "hist", HistoryKind::Deep, None)
            .unwrap();

        let err = builder.initial(a, hist).unwrap_err();
        assert!(matches!(err, StructureError::PseudostateInitial { .. }));
    }

    #[test]
    fn embed_transfers_subtree_and_transitions() {
        let mut sub: MachineBuilder<Ev, ()> = MachineBuilder::new("sub");
        let s1 = sub.state(sub.root(), "s1").unwrap();
        let s2 = sub.state(sub.root(), "s2").unwrap();
        sub.initial(sub.root(), s1).unwrap();
        sub.transition(s1, s2, |_| true, Some("hop")).unwrap();

        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
        let slot = builder.state(builder.root(), "slot").unwrap();
        builder.initial(builder.root(), slot).unwrap();
        let handle = builder.embed(slot, sub).unwrap();
        builder.initial(slot, handle.root).unwrap();

        let machine = builder.build().unwrap();
        assert_eq!(machine.tree().name(handle.map(s1)), "s1");
        assert!(machine.tree().node(handle.root).submachine().is_some());
        assert_eq!(machine.transitions_of(handle.map(s1)).len(), 1);
    }
}
