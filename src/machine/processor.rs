//! The event cycle: match, resolve conflicts, exit, enter, complete.
//!
//! Mutation is phase-committed: each phase works on a scratch copy of
//! the active configuration and commits only after all of its
//! notifications succeeded. A failing guard or listener therefore
//! leaves the machine exactly as it was before the failed phase, and a
//! cycle cancelled at a suspension point leaves the last fully
//! committed phase in place.

use log::{debug, trace};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use stillwater::prelude::*;

use super::{Lifecycle, Machine};
use crate::core::event::{Cause, CoreEvent, Event, ProcessingResult};
use crate::core::history::StoredConfiguration;
use crate::core::state::{ChildMode, HistoryKind, StateId, StateKind};
use crate::core::transition::MatchOutcome;
use crate::error::{ProcessingError, StructureError};
use crate::listener::Notification;

/// Completion events synthesized within one cycle before the engine
/// declares the chart misconfigured. A defensive fuse, not a normal
/// outcome.
pub(crate) const COMPLETION_FUSE: usize = 32;

/// Bound on choice-to-choice resolution chains.
pub(crate) const CHOICE_FUSE: usize = 8;

fn structure(err: StructureError) -> ProcessingError {
    ProcessingError::illegal(err.to_string())
}

/// One winning transition after choice resolution.
struct ResolvedTransition {
    source: StateId,
    targets: Vec<StateId>,
    label: Option<String>,
}

/// Result of matching one (sub)region of the configuration.
enum RegionMatch {
    None,
    Declined { source: StateId },
    Fired(Vec<ResolvedTransition>),
}

enum RoundOutcome {
    NoMatch,
    Declined,
    Fired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct EntryStep {
    state: StateId,
    /// True when this state is the transition's direct target, which is
    /// the only position a data state may receive its payload in.
    direct: bool,
}

struct Plan {
    exits: BTreeSet<StateId>,
    entries: Vec<EntryStep>,
}

impl<E: Event, Env: Clone + Send + Sync + 'static> Machine<E, Env> {
    /// Activate the root's default configuration (machine start).
    pub(super) async fn enter_initial(&mut self, env: &Env) -> Result<(), ProcessingError> {
        let path = self
            .tree
            .resolve_default_path(self.tree.root())
            .map_err(structure)?;
        let entries: Vec<EntryStep> = path
            .into_iter()
            .map(|state| EntryStep {
                state,
                direct: false,
            })
            .collect();
        self.enter_states(&entries, &Cause::Start, env).await
    }

    pub(super) async fn settle_completions_after_start(
        &mut self,
        env: &Env,
    ) -> Result<(), ProcessingError> {
        self.run_completion_loop(env).await
    }

    /// One full processing cycle for an external event, including any
    /// inline completion sub-cycles.
    pub(super) async fn run_cycle(
        &mut self,
        event: E,
        env: &Env,
    ) -> Result<ProcessingResult, ProcessingError> {
        trace!("machine {} processing '{}'", self.id, event.label());
        let core = CoreEvent::External(event.clone());
        match self.run_round(&core, env).await? {
            RoundOutcome::NoMatch => {
                debug!("machine {} ignored '{}'", self.id, event.label());
                self.listeners.notify_ignored(&event, env).await?;
                Ok(ProcessingResult::Ignored)
            }
            RoundOutcome::Declined => {
                // A declined transition consumes the event without a
                // state change; the ignored-event handler still hears
                // about it.
                self.listeners.notify_ignored(&event, env).await?;
                Ok(ProcessingResult::Ignored)
            }
            RoundOutcome::Fired => {
                self.run_completion_loop(env).await?;
                Ok(ProcessingResult::Processed)
            }
        }
    }

    /// Match one event against the configuration and, if transitions
    /// win, run the exit and entry phases.
    async fn run_round(
        &mut self,
        event: &CoreEvent<E>,
        env: &Env,
    ) -> Result<RoundOutcome, ProcessingError> {
        let matched = self.match_from(self.tree.root(), event, env).await?;
        let cause = event.cause();
        match matched {
            RegionMatch::None => Ok(RoundOutcome::NoMatch),
            RegionMatch::Declined { source } => {
                self.listeners
                    .notify(&Notification::TransitionDeclined { source, cause }, env)
                    .await?;
                Ok(RoundOutcome::Declined)
            }
            RegionMatch::Fired(resolved) => {
                let plans: Vec<Plan> = resolved
                    .iter()
                    .map(|rt| self.plan_transition(rt))
                    .collect::<Result<_, _>>()?;
                self.check_conflicts(&resolved, &plans)?;

                for rt in &resolved {
                    debug!(
                        "machine {} transition '{}' -> {:?}",
                        self.id,
                        self.tree.name(rt.source),
                        rt.targets
                    );
                    self.listeners
                        .notify(
                            &Notification::TransitionTriggered {
                                source: rt.source,
                                targets: rt.targets.clone(),
                                label: rt.label.clone(),
                                cause: cause.clone(),
                            },
                            env,
                        )
                        .await?;
                }

                let mut exit_set = BTreeSet::new();
                for plan in &plans {
                    exit_set.extend(plan.exits.iter().copied());
                }
                // Deepest-first: reversed preorder puts children before
                // their parents.
                let ordered_exits: Vec<StateId> = self
                    .tree
                    .preorder()
                    .into_iter()
                    .filter(|id| exit_set.contains(id))
                    .rev()
                    .collect();
                self.exit_states(&ordered_exits, &cause, env).await?;

                let mut entries = Vec::new();
                let mut seen = BTreeSet::new();
                for plan in &plans {
                    for step in &plan.entries {
                        if seen.insert(step.state) {
                            entries.push(*step);
                        }
                    }
                }
                self.enter_states(&entries, &cause, env).await?;
                Ok(RoundOutcome::Fired)
            }
        }
    }

    /// Innermost-first match: a transition on an active descendant wins
    /// over one on its ancestor; parallel regions match independently
    /// and every firing region is honored.
    fn match_from<'a>(
        &'a self,
        state: StateId,
        event: &'a CoreEvent<E>,
        env: &'a Env,
    ) -> Pin<Box<dyn Future<Output = Result<RegionMatch, ProcessingError>> + Send + 'a>> {
        Box::pin(async move {
            let node = self.tree.node(state);
            match node.child_mode() {
                ChildMode::Exclusive => {
                    if let Some(child) = self.config.active_child(&self.tree, state) {
                        let inner = self.match_from(child, event, env).await?;
                        if !matches!(inner, RegionMatch::None) {
                            return Ok(inner);
                        }
                    }
                }
                ChildMode::Parallel => {
                    let mut fired = Vec::new();
                    let mut declined = None;
                    for &child in node.children() {
                        if !self.config.is_active(child) {
                            continue;
                        }
                        match self.match_from(child, event, env).await? {
                            RegionMatch::None => {}
                            RegionMatch::Declined { source } => {
                                if declined.is_none() {
                                    declined = Some(source);
                                }
                            }
                            RegionMatch::Fired(mut list) => fired.append(&mut list),
                        }
                    }
                    if !fired.is_empty() {
                        return Ok(RegionMatch::Fired(fired));
                    }
                    if let Some(source) = declined {
                        return Ok(RegionMatch::Declined { source });
                    }
                }
            }

            match self.table.match_state(state, event, env).await? {
                MatchOutcome::NoMatch => Ok(RegionMatch::None),
                MatchOutcome::Declined => Ok(RegionMatch::Declined { source: state }),
                MatchOutcome::Targets { targets, label } => {
                    let cause = event.cause();
                    let mut resolved = Vec::with_capacity(targets.len());
                    for target in targets {
                        resolved.push(self.resolve_choice(target, &cause, env).await?);
                    }
                    Ok(RegionMatch::Fired(vec![ResolvedTransition {
                        source: state,
                        targets: resolved,
                        label,
                    }]))
                }
            }
        })
    }

    /// Substitute a choice pseudostate with its resolved real target,
    /// following choice-to-choice chains up to the fuse. No entry/exit
    /// notification ever fires for the choice itself.
    async fn resolve_choice(
        &self,
        mut target: StateId,
        cause: &Cause<E>,
        env: &Env,
    ) -> Result<StateId, ProcessingError> {
        for _ in 0..CHOICE_FUSE {
            // Resolvers and direction functions mint nothing: every id
            // they return must come from this machine's tree.
            if target.index() >= self.tree.len() {
                return Err(ProcessingError::illegal(format!(
                    "transition target {target:?} is not a state of this machine"
                )));
            }
            if !matches!(self.tree.node(target).kind(), StateKind::Choice) {
                return Ok(target);
            }
            let resolver = self.choices.get(&target).ok_or_else(|| {
                ProcessingError::illegal(format!(
                    "choice state '{}' has no resolver",
                    self.tree.name(target)
                ))
            })?;
            target = resolver(cause).run(env).await?;
        }
        Err(ProcessingError::illegal(format!(
            "choice resolution exceeded {CHOICE_FUSE} hops"
        )))
    }

    /// Exit set and entry steps for one winning transition.
    fn plan_transition(&self, rt: &ResolvedTransition) -> Result<Plan, ProcessingError> {
        let mut lca = rt.source;
        for &target in &rt.targets {
            lca = self.tree.lowest_common_ancestor(lca, target);
        }

        let exits: BTreeSet<StateId> = self
            .config
            .active()
            .filter(|&id| self.tree.is_descendant_of(id, lca))
            .collect();

        let mut entries = Vec::new();
        let mut seen = BTreeSet::new();
        let mut push = |steps: Vec<EntryStep>, entries: &mut Vec<EntryStep>| {
            for step in steps {
                if seen.insert(step.state) {
                    entries.push(step);
                }
            }
        };

        // Chains from the LCA down to each target. Every link of every
        // chain counts as covered: a parallel region some chain passes
        // through must not also re-enter through its default.
        let mut chains = Vec::new();
        let mut covered = BTreeSet::new();
        for &target in &rt.targets {
            let chain = self.chain_to(lca, target);
            covered.extend(chain.iter().copied());
            chains.push((target, chain));
        }

        // Exiting below a parallel LCA tears down its other regions
        // too; they re-enter through their defaults.
        if self.tree.node(lca).child_mode() == ChildMode::Parallel {
            for &region in self.tree.node(lca).children() {
                if covered.contains(&region) || self.tree.node(region).kind().is_pseudostate() {
                    continue;
                }
                push(self.default_steps(region)?, &mut entries);
            }
        }

        for (target, chain) in chains {
            if chain.is_empty() {
                // Self re-entry: the LCA stays active, its descendants
                // re-enter through defaults.
                let mut steps = self.default_steps(target)?;
                steps.remove(0);
                push(steps, &mut entries);
                continue;
            }
            for (i, &link) in chain.iter().enumerate() {
                let is_target = i + 1 == chain.len();
                if is_target {
                    if let StateKind::History { .. } = self.tree.node(link).kind() {
                        push(self.expand_history(link)?, &mut entries);
                    } else {
                        let mut steps = self.default_steps(link)?;
                        steps[0].direct = true;
                        push(steps, &mut entries);
                    }
                } else {
                    push(
                        vec![EntryStep {
                            state: link,
                            direct: false,
                        }],
                        &mut entries,
                    );
                    if self.tree.node(link).child_mode() == ChildMode::Parallel {
                        for &region in self.tree.node(link).children() {
                            if covered.contains(&region)
                                || self.tree.node(region).kind().is_pseudostate()
                            {
                                continue;
                            }
                            push(self.default_steps(region)?, &mut entries);
                        }
                    }
                }
            }
        }

        Ok(Plan { exits, entries })
    }

    /// Path from just below `lca` down to `target`, shallowest-first.
    /// Empty when `target == lca`.
    fn chain_to(&self, lca: StateId, target: StateId) -> Vec<StateId> {
        let mut chain = Vec::new();
        let mut cursor = target;
        while cursor != lca {
            chain.push(cursor);
            match self.tree.node(cursor).parent() {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    fn default_steps(&self, state: StateId) -> Result<Vec<EntryStep>, ProcessingError> {
        Ok(self
            .tree
            .resolve_default_path(state)
            .map_err(structure)?
            .into_iter()
            .map(|s| EntryStep {
                state: s,
                direct: false,
            })
            .collect())
    }

    /// Entry steps substituted for a history pseudostate: the recorded
    /// configuration, else the default target, else the owner's
    /// default-initial child.
    fn expand_history(&self, history: StateId) -> Result<Vec<EntryStep>, ProcessingError> {
        let node = self.tree.node(history);
        let owner = node.parent().ok_or_else(|| {
            ProcessingError::illegal(format!("history state '{}' has no owner", node.name()))
        })?;
        let StateKind::History { default_target, .. } = *node.kind() else {
            return Err(ProcessingError::illegal(format!(
                "'{}' is not a history state",
                node.name()
            )));
        };

        match self.history.recorded(history) {
            Some(StoredConfiguration::Shallow(child)) => self.default_steps(*child),
            Some(StoredConfiguration::Deep(leaves)) => {
                let mut steps = Vec::new();
                let mut seen = BTreeSet::new();
                for &leaf in leaves {
                    for link in self.chain_to(owner, leaf) {
                        if seen.insert(link) {
                            steps.push(EntryStep {
                                state: link,
                                direct: false,
                            });
                        }
                    }
                }
                Ok(steps)
            }
            None => {
                let fallback = default_target
                    .or_else(|| self.tree.node(owner).initial())
                    .ok_or_else(|| {
                        ProcessingError::illegal(format!(
                            "history state '{}' has no recorded or default configuration",
                            node.name()
                        ))
                    })?;
                self.default_steps(fallback)
            }
        }
    }

    /// Two winning transitions whose exit or entry sets overlap were
    /// resolved for overlapping regions in the same cycle.
    fn check_conflicts(
        &self,
        resolved: &[ResolvedTransition],
        plans: &[Plan],
    ) -> Result<(), ProcessingError> {
        for i in 0..plans.len() {
            for j in i + 1..plans.len() {
                let exits_overlap = plans[i].exits.intersection(&plans[j].exits).next().is_some();
                let entries_overlap = plans[i]
                    .entries
                    .iter()
                    .any(|a| plans[j].entries.iter().any(|b| a.state == b.state));
                if exits_overlap || entries_overlap {
                    return Err(ProcessingError::Conflict {
                        first: self.tree.name(resolved[i].source).to_string(),
                        second: self.tree.name(resolved[j].source).to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Exit phase: capture history, deactivate deepest-first, clear
    /// data payloads, notify per node; commit only if every
    /// notification succeeded.
    async fn exit_states(
        &mut self,
        exits: &[StateId],
        cause: &Cause<E>,
        env: &Env,
    ) -> Result<(), ProcessingError> {
        if exits.is_empty() {
            return Ok(());
        }

        // Capture before anything deactivates: the recorded
        // configuration is the one being left.
        let mut captures = Vec::new();
        for &owner in exits {
            for &child in self.tree.node(owner).children() {
                let StateKind::History { kind, .. } = self.tree.node(child).kind() else {
                    continue;
                };
                match kind {
                    HistoryKind::Shallow => {
                        if let Some(active) = self.config.active_child(&self.tree, owner) {
                            captures.push((child, StoredConfiguration::Shallow(active)));
                        }
                    }
                    HistoryKind::Deep => {
                        let leaves: Vec<StateId> = self
                            .config
                            .leaves()
                            .iter()
                            .copied()
                            .filter(|&leaf| self.tree.is_descendant_of(leaf, owner))
                            .collect();
                        if !leaves.is_empty() {
                            captures.push((child, StoredConfiguration::Deep(leaves)));
                        }
                    }
                }
            }
        }

        let mut scratch = self.config.clone();
        for &state in exits {
            scratch.deactivate(state);
            trace!("machine {} exit '{}'", self.id, self.tree.name(state));
            self.listeners
                .notify(
                    &Notification::StateExited {
                        state,
                        cause: cause.clone(),
                    },
                    env,
                )
                .await?;
        }

        // Commit.
        for (history, stored) in captures {
            self.history.capture(history, stored);
        }
        for &state in exits {
            self.data.remove(&state);
            self.finished_marked.remove(&state);
        }
        scratch.rebuild_leaves(&self.tree);
        self.config = scratch;
        Ok(())
    }

    /// Entry phase: activate shallowest-first, seed data payloads on
    /// direct targets, notify per node; commit and audit at the end.
    async fn enter_states(
        &mut self,
        entries: &[EntryStep],
        cause: &Cause<E>,
        env: &Env,
    ) -> Result<(), ProcessingError> {
        let mut scratch = self.config.clone();
        let mut payloads = Vec::new();
        for step in entries {
            if scratch.is_active(step.state) {
                continue;
            }
            let node = self.tree.node(step.state);
            if let StateKind::Data {
                type_name, type_id, ..
            } = node.kind()
            {
                if !step.direct {
                    return Err(ProcessingError::illegal(format!(
                        "data state '{}' implicitly activated by a cross-level transition; \
                         it can only receive data as a direct transition target",
                        node.name()
                    )));
                }
                let payload = cause.event().and_then(|event| event.payload()).ok_or_else(
                    || {
                        ProcessingError::illegal(format!(
                            "event '{}' does not carry the {} payload required by '{}'",
                            cause.label(),
                            type_name,
                            node.name()
                        ))
                    },
                )?;
                if (*payload).type_id() != *type_id {
                    return Err(ProcessingError::illegal(format!(
                        "payload of event '{}' is not the {} required by '{}'",
                        cause.label(),
                        type_name,
                        node.name()
                    )));
                }
                payloads.push((step.state, payload));
            }
            scratch.activate(step.state);
            trace!("machine {} enter '{}'", self.id, self.tree.name(step.state));
            self.listeners
                .notify(
                    &Notification::StateEntered {
                        state: step.state,
                        cause: cause.clone(),
                    },
                    env,
                )
                .await?;
        }

        // Audit before committing: a plan that produced an inconsistent
        // configuration must not replace the committed one.
        scratch.rebuild_leaves(&self.tree);
        scratch.audit(&self.tree)?;
        for (state, payload) in payloads {
            self.data.insert(state, payload);
        }
        self.config = scratch;
        Ok(())
    }

    /// After entry, bubble synthesized completion events until the
    /// configuration settles (or the fuse blows).
    async fn run_completion_loop(&mut self, env: &Env) -> Result<(), ProcessingError> {
        let mut rounds = 0;
        'outer: loop {
            let complete = self.complete_states();
            self.finished_marked.retain(|id| complete.contains(id));
            let mut newly: Vec<StateId> = complete
                .iter()
                .copied()
                .filter(|id| !self.finished_marked.contains(id))
                .collect();
            if newly.is_empty() {
                return Ok(());
            }
            // Innermost completions bubble first.
            newly.sort_by_key(|&id| std::cmp::Reverse(self.tree.depth(id)));

            for id in newly {
                self.finished_marked.insert(id);
                if id == self.tree.root() {
                    debug!("machine {} finished", self.id);
                    self.lifecycle = Lifecycle::Finished;
                    self.listeners.notify(&Notification::Finished, env).await?;
                    return Ok(());
                }
                rounds += 1;
                if rounds > COMPLETION_FUSE {
                    return Err(ProcessingError::InfiniteCompletionLoop {
                        limit: COMPLETION_FUSE,
                    });
                }
                trace!(
                    "machine {} completion event for '{}'",
                    self.id,
                    self.tree.name(id)
                );
                let outcome = self
                    .run_round(&CoreEvent::Completed(id), env)
                    .await?;
                if matches!(outcome, RoundOutcome::Fired) {
                    // The configuration changed; recompute what is
                    // complete before bubbling further.
                    continue 'outer;
                }
            }
        }
    }

    /// Active composites whose entire child set reached final states.
    /// Final leaves complete their parent's region; they do not emit
    /// completion events of their own.
    fn complete_states(&self) -> BTreeSet<StateId> {
        self.config
            .active()
            .filter(|&id| {
                let node = self.tree.node(id);
                let composite = node
                    .children()
                    .iter()
                    .any(|&c| !self.tree.node(c).kind().is_pseudostate());
                composite && self.is_complete(id)
            })
            .collect()
    }

    fn is_complete(&self, id: StateId) -> bool {
        let node = self.tree.node(id);
        let enterable: Vec<StateId> = node
            .children()
            .iter()
            .copied()
            .filter(|&c| !self.tree.node(c).kind().is_pseudostate())
            .collect();
        if enterable.is_empty() {
            return node.is_final();
        }
        match node.child_mode() {
            ChildMode::Exclusive => self
                .config
                .active_child(&self.tree, id)
                .is_some_and(|child| self.tree.node(child).is_final()),
            ChildMode::Parallel => enterable.iter().all(|&region| self.is_complete(region)),
        }
    }
}
