//! Property-based tests for the event cycle.
//!
//! These tests use proptest to verify that the configuration
//! invariants hold after arbitrary event streams, not just the
//! hand-picked scenarios.

use proptest::prelude::*;
use std::future::Future;

use trellis::builder::MachineBuilder;
use trellis::core::{Event, HistoryKind, ProcessingResult, StateId};
use trellis::machine::{Lifecycle, Machine};

#[derive(Clone, Debug, PartialEq)]
enum Ev {
    Flip,
    Hop,
    Out,
    Back,
    End,
}

impl Event for Ev {
    fn label(&self) -> &str {
        match self {
            Self::Flip => "Flip",
            Self::Hop => "Hop",
            Self::Out => "Out",
            Self::Back => "Back",
            Self::End => "End",
        }
    }
}

fn run<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(future)
}

/// A chart exercising exclusive nesting, a parallel composite and a
/// final state: `root { A { a1, a2 }, P { r1 { x1, x2 }, r2 { y1, y2 } },
/// done }`.
fn sample_chart() -> Machine<Ev, ()> {
    let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
    let a = builder.state(builder.root(), "a").unwrap();
    let p = builder.parallel_state(builder.root(), "p").unwrap();
    let done = builder.final_state(builder.root(), "done").unwrap();
    let a1 = builder.state(a, "a1").unwrap();
    let a2 = builder.state(a, "a2").unwrap();
    let r1 = builder.state(p, "r1").unwrap();
    let r2 = builder.state(p, "r2").unwrap();
    let x1 = builder.state(r1, "x1").unwrap();
    let x2 = builder.state(r1, "x2").unwrap();
    let y1 = builder.state(r2, "y1").unwrap();
    let y2 = builder.state(r2, "y2").unwrap();
    builder.initial(builder.root(), a).unwrap();
    builder.initial(a, a1).unwrap();
    builder.initial(r1, x1).unwrap();
    builder.initial(r2, y1).unwrap();

    builder.transition(a1, a2, |e| matches!(e, Ev::Flip), None).unwrap();
    builder.transition(a2, a1, |e| matches!(e, Ev::Flip), None).unwrap();
    builder.transition(a, p, |e| matches!(e, Ev::Hop), None).unwrap();
    builder.transition(x1, x2, |e| matches!(e, Ev::Flip), None).unwrap();
    builder.transition(x2, x1, |e| matches!(e, Ev::Flip), None).unwrap();
    builder.transition(y1, y2, |e| matches!(e, Ev::Hop), None).unwrap();
    builder.transition(p, a, |e| matches!(e, Ev::Out), None).unwrap();
    builder.transition(a, done, |e| matches!(e, Ev::End), None).unwrap();
    builder.build().unwrap()
}

prop_compose! {
    fn arbitrary_event()(variant in 0..5u8) -> Ev {
        match variant {
            0 => Ev::Flip,
            1 => Ev::Hop,
            2 => Ev::Out,
            3 => Ev::Back,
            _ => Ev::End,
        }
    }
}

proptest! {
    #[test]
    fn configuration_invariants_hold_after_any_event_stream(
        events in proptest::collection::vec(arbitrary_event(), 0..24)
    ) {
        run(async {
            let mut machine = sample_chart();
            machine.start(&()).await.unwrap();

            for event in events {
                let result = machine.process_event(event, &()).await.unwrap();
                prop_assert!(matches!(
                    result,
                    ProcessingResult::Processed | ProcessingResult::Ignored
                ));
                machine
                    .configuration()
                    .audit(machine.tree())
                    .expect("configuration invariants violated");
            }

            prop_assert!(matches!(
                machine.lifecycle(),
                Lifecycle::Running | Lifecycle::Finished
            ));
            Ok(())
        })?;
    }

    #[test]
    fn trace_records_exactly_one_entry_per_submission(
        events in proptest::collection::vec(arbitrary_event(), 0..16)
    ) {
        run(async {
            let mut machine = sample_chart();
            machine.start(&()).await.unwrap();

            let total = events.len();
            for event in events {
                machine.process_event(event, &()).await.unwrap();
            }

            prop_assert_eq!(machine.trace().len(), total);
            for window in machine.trace().windows(2) {
                prop_assert!(window[0].timestamp <= window[1].timestamp);
            }
            Ok(())
        })?;
    }

    #[test]
    fn snapshot_roundtrips_through_json(
        events in proptest::collection::vec(arbitrary_event(), 0..16)
    ) {
        run(async {
            let mut machine = sample_chart();
            machine.start(&()).await.unwrap();
            for event in events {
                machine.process_event(event, &()).await.unwrap();
            }

            let snapshot = machine.snapshot();
            let json = serde_json::to_string(&snapshot).unwrap();
            let back: trellis::core::ConfigurationSnapshot = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(snapshot, back);
            Ok(())
        })?;
    }

    #[test]
    fn shallow_history_always_restores_the_last_child(
        flips in 0..6usize
    ) {
        run(async {
            let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
            let a = builder.state(builder.root(), "a").unwrap();
            let b = builder.state(builder.root(), "b").unwrap();
            let a1 = builder.state(a, "a1").unwrap();
            let a2 = builder.state(a, "a2").unwrap();
            let hist = builder
                .history_state(a, "hist", HistoryKind::Shallow, None)
                .unwrap();
            builder.initial(builder.root(), a).unwrap();
            builder.initial(a, a1).unwrap();
            builder.transition(a1, a2, |e| matches!(e, Ev::Flip), None).unwrap();
            builder.transition(a2, a1, |e| matches!(e, Ev::Flip), None).unwrap();
            builder.transition(a, b, |e| matches!(e, Ev::Out), None).unwrap();
            builder.transition(b, hist, |e| matches!(e, Ev::Back), None).unwrap();

            let mut machine = builder.build().unwrap();
            machine.start(&()).await.unwrap();

            for _ in 0..flips {
                machine.process_event(Ev::Flip, &()).await.unwrap();
            }
            let before: Vec<StateId> = machine.active_leaves().to_vec();

            machine.process_event(Ev::Out, &()).await.unwrap();
            machine.process_event(Ev::Back, &()).await.unwrap();

            prop_assert_eq!(machine.active_leaves().to_vec(), before);
            Ok(())
        })?;
    }
}
