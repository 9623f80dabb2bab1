//! The machine: lifecycle, serialized event intake, and the runtime
//! state the processor drives.
//!
//! A machine is single-threaded by construction: `process_event` takes
//! `&mut self`, so exactly one cycle is ever in flight and the active
//! configuration is never observed mid-transition. Re-entrant
//! submissions (from guards or listeners) go through a [`Postbox`] and
//! are drained strictly after the in-flight cycle resolves.

mod processor;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use stillwater::effect::BoxedEffect;
use uuid::Uuid;

use crate::core::config::{ActiveConfiguration, ConfigurationSnapshot};
use crate::core::event::{Cause, Event, Payload, ProcessingResult};
use crate::core::history::HistoryStore;
use crate::core::state::{StateId, StateKind};
use crate::core::transition::TransitionTable;
use crate::core::tree::StateTree;
use crate::error::ProcessingError;
use crate::listener::ListenerRegistry;

/// Resolver of a choice pseudostate. Evaluated synchronously as part of
/// reaching the choice: the resolved target substitutes for the choice
/// before any exit or entry happens, so from the outside the whole
/// thing is one atomic transition.
pub type ChoiceFn<E, Env> =
    Arc<dyn Fn(&Cause<E>) -> BoxedEffect<StateId, ProcessingError, Env> + Send + Sync>;

/// Machine lifecycle. `Finished` is reached when the root's
/// configuration collapses to final states; `Destroyed` is the explicit
/// terminal teardown.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Lifecycle {
    Created,
    Running,
    Finished,
    Destroyed,
}

/// What happens to an event posted while a cycle is in flight.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PendingPolicy {
    /// Queue FIFO and drain after the current cycle (default).
    Queue,
    /// Refuse the submission with an error.
    Reject,
}

/// One processed submission, for the machine trace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceRecord {
    pub event: String,
    pub result: ProcessingResult,
    pub timestamp: DateTime<Utc>,
}

/// Cloneable handle for submitting events from outside the `&mut`
/// driver, e.g. from inside a guard or listener. Posted events are
/// queued and drained after the in-flight cycle, preserving the
/// serialized contract.
pub struct Postbox<E> {
    queue: Arc<Mutex<VecDeque<E>>>,
    destroyed: Arc<AtomicBool>,
    policy: PendingPolicy,
    machine_id: Uuid,
}

impl<E> Clone for Postbox<E> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            destroyed: Arc::clone(&self.destroyed),
            policy: self.policy,
            machine_id: self.machine_id,
        }
    }
}

impl<E: Event> Postbox<E> {
    /// Queue an event. Reports `Pending`; the event is processed once
    /// the currently suspended or running cycle fully resolves.
    pub fn post(&self, event: E) -> Result<ProcessingResult, ProcessingError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ProcessingError::MachineDestroyed {
                id: self.machine_id,
            });
        }
        match self.policy {
            PendingPolicy::Queue => {
                self.queue
                    .lock()
                    .map_err(|_| ProcessingError::illegal("event queue poisoned"))?
                    .push_back(event);
                Ok(ProcessingResult::Pending)
            }
            PendingPolicy::Reject => Err(ProcessingError::illegal(format!(
                "event '{}' refused: machine does not queue pending events",
                event.label()
            ))),
        }
    }
}

/// A hierarchical statechart machine.
///
/// Built once by [`crate::builder::MachineBuilder`]; the tree shape is
/// immutable afterwards. Everything mutable is the runtime projection:
/// active configuration, history store, data payloads, lifecycle,
/// trace.
pub struct Machine<E: Event, Env: Clone + Send + Sync + 'static> {
    pub(crate) id: Uuid,
    pub(crate) tree: StateTree,
    pub(crate) table: TransitionTable<E, Env>,
    pub(crate) choices: HashMap<StateId, ChoiceFn<E, Env>>,
    pub(crate) listeners: ListenerRegistry<E, Env>,
    pub(crate) history: HistoryStore,
    pub(crate) config: ActiveConfiguration,
    pub(crate) data: HashMap<StateId, Payload>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) finished_marked: std::collections::BTreeSet<StateId>,
    pub(crate) queue: Arc<Mutex<VecDeque<E>>>,
    pub(crate) destroyed: Arc<AtomicBool>,
    pub(crate) policy: PendingPolicy,
    pub(crate) trace: Vec<TraceRecord>,
}

impl<E: Event, Env: Clone + Send + Sync + 'static> Machine<E, Env> {
    pub(crate) fn from_parts(
        tree: StateTree,
        table: TransitionTable<E, Env>,
        choices: HashMap<StateId, ChoiceFn<E, Env>>,
        listeners: ListenerRegistry<E, Env>,
        policy: PendingPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tree,
            table,
            choices,
            listeners,
            history: HistoryStore::new(),
            config: ActiveConfiguration::new(),
            data: HashMap::new(),
            lifecycle: Lifecycle::Created,
            finished_marked: std::collections::BTreeSet::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            destroyed: Arc::new(AtomicBool::new(false)),
            policy,
            trace: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_finished(&self) -> bool {
        self.lifecycle == Lifecycle::Finished
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle == Lifecycle::Destroyed
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn configuration(&self) -> &ActiveConfiguration {
        &self.config
    }

    pub fn is_active(&self, state: StateId) -> bool {
        self.config.is_active(state)
    }

    pub fn active_leaves(&self) -> &[StateId] {
        self.config.leaves()
    }

    pub fn snapshot(&self) -> ConfigurationSnapshot {
        self.config.snapshot(&self.tree)
    }

    /// Processed submissions with timestamps, oldest first.
    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    pub fn postbox(&self) -> Postbox<E> {
        Postbox {
            queue: Arc::clone(&self.queue),
            destroyed: Arc::clone(&self.destroyed),
            policy: self.policy,
            machine_id: self.id,
        }
    }

    /// Activate the root's default configuration and move to `Running`
    /// (or straight to `Finished` when the default configuration is
    /// already final).
    pub async fn start(&mut self, env: &Env) -> Result<(), ProcessingError> {
        match self.lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Destroyed => {
                return Err(ProcessingError::MachineDestroyed { id: self.id });
            }
            _ => return Err(ProcessingError::illegal("machine already started")),
        }
        debug!("machine {} starting", self.id);
        self.lifecycle = Lifecycle::Running;
        self.enter_initial(env).await?;
        self.settle_completions_after_start(env).await
    }

    /// Submit one event. The cycle (and any completion sub-cycles) runs
    /// to completion, then the postbox queue is drained FIFO, all
    /// within this call.
    pub async fn process_event(
        &mut self,
        event: E,
        env: &Env,
    ) -> Result<ProcessingResult, ProcessingError> {
        let result = self.intake(event, env).await?;
        self.drain_postbox(env).await?;
        Ok(result)
    }

    async fn intake(&mut self, event: E, env: &Env) -> Result<ProcessingResult, ProcessingError> {
        match self.lifecycle {
            Lifecycle::Destroyed => {
                return Err(ProcessingError::MachineDestroyed { id: self.id });
            }
            Lifecycle::Created => {
                return Err(ProcessingError::illegal(
                    "machine not started; call start() before process_event()",
                ));
            }
            Lifecycle::Finished => {
                // A finished machine ignores everything but still tells
                // its ignored-event handler.
                self.listeners.notify_ignored(&event, env).await?;
                self.record(event.label(), ProcessingResult::Ignored);
                return Ok(ProcessingResult::Ignored);
            }
            Lifecycle::Running => {}
        }
        let label = event.label().to_string();
        let result = self.run_cycle(event, env).await?;
        self.record(&label, result);
        Ok(result)
    }

    async fn drain_postbox(&mut self, env: &Env) -> Result<(), ProcessingError> {
        loop {
            if self.lifecycle == Lifecycle::Destroyed {
                return Ok(());
            }
            let next = {
                let mut queue = self
                    .queue
                    .lock()
                    .map_err(|_| ProcessingError::illegal("event queue poisoned"))?;
                queue.pop_front()
            };
            let Some(event) = next else {
                return Ok(());
            };
            debug!("machine {} draining queued event '{}'", self.id, event.label());
            self.intake(event, env).await?;
        }
    }

    /// Explicit terminal teardown. Idempotent; queued events are
    /// dropped and any later submission fails with
    /// [`ProcessingError::MachineDestroyed`].
    pub async fn destroy(&mut self, env: &Env) -> Result<(), ProcessingError> {
        if self.lifecycle == Lifecycle::Destroyed {
            return Ok(());
        }
        debug!("machine {} destroyed", self.id);
        self.lifecycle = Lifecycle::Destroyed;
        self.destroyed.store(true, Ordering::Release);
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
        self.listeners
            .notify(&crate::listener::Notification::Destroyed, env)
            .await
    }

    /// Read the payload of an active data state.
    ///
    /// Reading while the state is inactive is a contract violation and
    /// reports `IllegalState` without touching the configuration.
    pub fn data_of<T: Send + Sync + 'static>(
        &self,
        state: StateId,
    ) -> Result<Arc<T>, ProcessingError> {
        let node = self.tree.node(state);
        let StateKind::Data { type_name, .. } = node.kind() else {
            return Err(ProcessingError::illegal(format!(
                "'{}' is not a data state",
                node.name()
            )));
        };
        if !self.config.is_active(state) {
            return Err(ProcessingError::illegal(format!(
                "data of '{}' read while the state is inactive",
                node.name()
            )));
        }
        let payload = self.data.get(&state).ok_or_else(|| {
            ProcessingError::illegal(format!("data state '{}' has no payload", node.name()))
        })?;
        Arc::clone(payload).downcast::<T>().map_err(|_| {
            ProcessingError::illegal(format!(
                "payload of '{}' is not a {}",
                node.name(),
                type_name
            ))
        })
    }

    fn record(&mut self, label: &str, result: ProcessingResult) {
        self.trace.push(TraceRecord {
            event: label.to_string(),
            result,
            timestamp: Utc::now(),
        });
    }
}
