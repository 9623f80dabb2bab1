//! Core statechart model.
//!
//! This module contains the data side of the engine:
//! - the arena-backed state tree and its structure rules
//! - events, causes and processing results
//! - transitions and the per-state transition table
//! - the active configuration and its invariants
//! - recorded history configurations
//!
//! Everything here is passive; the event cycle that drives it lives in
//! [`crate::machine`].

pub mod config;
pub mod event;
pub mod history;
pub mod state;
pub mod transition;
pub mod tree;

pub use config::{ActiveConfiguration, ConfigurationSnapshot};
pub use event::{Cause, Event, Payload, ProcessingResult};
pub use history::{HistoryStore, StoredConfiguration};
pub use state::{ChildMode, HistoryKind, StateId, StateKind, StateNode};
pub use transition::{Direction, DirectionFn, EventMatcher, Transition, TransitionTable};
pub use tree::{StateTree, SubtreeHandle};
