//! Events submitted to a machine.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::state::StateId;

/// Payload carried by an event for data states. Stored as shared `Any`
/// so one event can seed several parallel data targets.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// An external event.
///
/// Machines are generic over one event type, typically an enum; the
/// type-tag predicate of each transition decides which variants it
/// reacts to.
///
/// # Example
///
/// ```rust
/// use trellis::core::Event;
///
/// #[derive(Clone, Debug)]
/// enum DoorEvent {
///     Open,
///     Close,
/// }
///
/// impl Event for DoorEvent {
///     fn label(&self) -> &str {
///         match self {
///             Self::Open => "Open",
///             Self::Close => "Close",
///         }
///     }
/// }
/// ```
pub trait Event: Clone + Debug + Send + Sync + 'static {
    /// Short label used in notifications, traces and diagram export.
    fn label(&self) -> &str;

    /// Payload delivered to a data state targeted by this event.
    ///
    /// Default implementation carries no payload.
    fn payload(&self) -> Option<Payload> {
        None
    }
}

/// What `process_event` did with a submission.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ProcessingResult {
    /// At least one transition fired.
    Processed,
    /// No active state matched, or every match declined.
    Ignored,
    /// Queued behind an in-flight cycle; it will be drained once that
    /// cycle fully resolves.
    Pending,
}

/// What caused a transition to fire. Handed to choice resolvers and
/// carried on notifications.
#[derive(Clone, Debug)]
pub enum Cause<E: Event> {
    /// Initial activation when the machine starts.
    Start,
    /// An external event.
    Event(E),
    /// A completion event synthesized when the named composite's
    /// children all reached final states.
    Completion(StateId),
}

impl<E: Event> Cause<E> {
    /// The external event, when there is one.
    pub fn event(&self) -> Option<&E> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Start => "<start>",
            Self::Event(event) => event.label(),
            Self::Completion(_) => "<completed>",
        }
    }
}

/// Event representation inside one processing cycle. Completion events
/// exist only here: they are synthesized and consumed inline, never
/// queued and never observable as external submissions.
#[derive(Clone, Debug)]
pub(crate) enum CoreEvent<E: Event> {
    External(E),
    Completed(StateId),
}

impl<E: Event> CoreEvent<E> {
    pub(crate) fn cause(&self) -> Cause<E> {
        match self {
            Self::External(event) => Cause::Event(event.clone()),
            Self::Completed(id) => Cause::Completion(*id),
        }
    }
}
