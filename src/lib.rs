//! Trellis: a hierarchical statechart execution engine
//!
//! Trellis runs statecharts in the "pure core, imperative shell" style:
//! the state tree, active configuration and transition resolution are
//! plain data and pure functions, while guards, choice resolvers and
//! listeners are Stillwater effects that may suspend mid-cycle without
//! ever exposing a half-transitioned machine.
//!
//! # Core concepts
//!
//! - **States** compose into a tree: exclusive composites (one active
//!   child) and parallel composites (all regions active), plus final,
//!   data, history and choice states
//! - **Events** drive serialized processing cycles; re-entrant
//!   submissions queue through a [`machine::Postbox`]
//! - **Transitions** resolve innermost-first, may decline per event,
//!   and conflicting cross-region winners are rejected atomically
//! - **Completion** bubbles synthesized events when every region of a
//!   composite reaches a final state; a finished root finishes the
//!   machine
//!
//! # Example
//!
//! ```rust
//! use trellis::builder::MachineBuilder;
//! use trellis::core::{Event, ProcessingResult};
//!
//! #[derive(Clone, Debug)]
//! enum TrafficEvent {
//!     Next,
//! }
//!
//! impl Event for TrafficEvent {
//!     fn label(&self) -> &str {
//!         "Next"
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder: MachineBuilder<TrafficEvent, ()> = MachineBuilder::new("light");
//! let green = builder.state(builder.root(), "green")?;
//! let red = builder.state(builder.root(), "red")?;
//! builder.initial(builder.root(), green)?;
//! builder.transition(green, red, |_| true, Some("stop"))?;
//! builder.transition(red, green, |_| true, Some("go"))?;
//!
//! let mut machine = builder.build()?;
//! machine.start(&()).await?;
//! assert!(machine.is_active(green));
//!
//! let result = machine.process_event(TrafficEvent::Next, &()).await?;
//! assert_eq!(result, ProcessingResult::Processed);
//! assert!(machine.is_active(red));
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod core;
pub mod error;
pub mod export;
pub mod introspect;
pub mod listener;
pub mod machine;

// Re-export commonly used types
pub use builder::MachineBuilder;
pub use self::core::{
    Cause, ChildMode, ConfigurationSnapshot, Direction, Event, HistoryKind, Payload,
    ProcessingResult, StateId,
};
pub use error::{ProcessingError, StructureError};
pub use introspect::{TargetInfo, TransitionInfo, TriggerInfo};
pub use listener::{ListenerFn, Notification};
pub use machine::{Lifecycle, Machine, PendingPolicy, Postbox, TraceRecord};
