//! Diagram export.
//!
//! Renders the frozen tree as PlantUML or Mermaid state-diagram text.
//! Output is deterministic for a given tree: states appear in
//! registration order and transitions in registration order per source,
//! so exported diagrams are reproducible and diff-friendly.
//!
//! Conditional transitions have no statically known target and are
//! rendered as a self-referencing dashed edge with their label, which
//! keeps them visible without guessing where they go.

use crate::core::event::Event;
use crate::core::state::{ChildMode, HistoryKind, StateId, StateKind};
use crate::introspect::{TargetInfo, TransitionInfo, TriggerInfo};
use crate::machine::Machine;

/// Stable identifier derived from the full path: non-alphanumeric
/// characters collapse to underscores.
fn alias<E: Event, Env: Clone + Send + Sync + 'static>(
    machine: &Machine<E, Env>,
    id: StateId,
) -> String {
    machine
        .path_name(id)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn transition_line<E: Event, Env: Clone + Send + Sync + 'static>(
    machine: &Machine<E, Env>,
    info: &TransitionInfo,
) -> String {
    let source = alias(machine, info.source);
    let label = match (&info.trigger, info.label.as_deref()) {
        (_, Some(label)) => Some(label.to_string()),
        (TriggerInfo::Completion { .. }, None) => Some("completed".to_string()),
        (TriggerInfo::Event, None) => None,
    };
    match &info.target {
        TargetInfo::Static(target) => {
            let target = alias(machine, *target);
            match label {
                Some(label) => format!("{source} --> {target} : {label}"),
                None => format!("{source} --> {target}"),
            }
        }
        TargetInfo::Conditional => {
            let label = label.unwrap_or_else(|| "conditional".to_string());
            format!("{source} --> {source} : {label} [conditional]")
        }
    }
}

/// Render the machine's tree as a PlantUML state diagram.
pub fn plantuml<E: Event, Env: Clone + Send + Sync + 'static>(machine: &Machine<E, Env>) -> String {
    let mut out = String::from("@startuml\nhide empty description\n");
    let tree = machine.tree();
    let root = tree.root();

    for &child in tree.node(root).children() {
        plantuml_state(machine, child, 0, &mut out);
    }
    if let Some(initial) = tree.node(root).initial() {
        out.push_str(&format!("[*] --> {}\n", alias(machine, initial)));
    }
    for info in machine.all_transitions() {
        out.push_str(&transition_line(machine, &info));
        out.push('\n');
    }
    out.push_str("@enduml\n");
    out
}

fn plantuml_state<E: Event, Env: Clone + Send + Sync + 'static>(
    machine: &Machine<E, Env>,
    id: StateId,
    depth: usize,
    out: &mut String,
) {
    let tree = machine.tree();
    let node = tree.node(id);
    let name = alias(machine, id);

    indent(out, depth);
    match node.kind() {
        StateKind::Choice => {
            out.push_str(&format!("state {name} <<choice>>\n"));
            return;
        }
        StateKind::History { kind, .. } => {
            let stereotype = match kind {
                HistoryKind::Shallow => "<<history>>",
                HistoryKind::Deep => "<<history*>>",
            };
            out.push_str(&format!(
                "state \"{}\" as {name} {stereotype}\n",
                node.name()
            ));
            return;
        }
        StateKind::Final => {
            out.push_str(&format!("state \"{}\" as {name} <<end>>\n", node.name()));
            return;
        }
        StateKind::Plain | StateKind::Data { .. } => {}
    }

    if node.is_leaf() {
        out.push_str(&format!("state \"{}\" as {name}\n", node.name()));
        return;
    }

    out.push_str(&format!("state \"{}\" as {name} {{\n", node.name()));
    match node.child_mode() {
        ChildMode::Exclusive => {
            if let Some(initial) = node.initial() {
                indent(out, depth + 1);
                out.push_str(&format!("[*] --> {}\n", alias(machine, initial)));
            }
            for &child in node.children() {
                plantuml_state(machine, child, depth + 1, out);
            }
        }
        ChildMode::Parallel => {
            let mut first = true;
            for &child in node.children() {
                if !first {
                    indent(out, depth + 1);
                    out.push_str("--\n");
                }
                first = false;
                plantuml_state(machine, child, depth + 1, out);
            }
        }
    }
    indent(out, depth);
    out.push_str("}\n");
}

/// Render the machine's tree as a Mermaid `stateDiagram-v2`.
///
/// Mermaid has no history notation; history pseudostates render as
/// annotated plain states so the diagram stays loadable.
pub fn mermaid<E: Event, Env: Clone + Send + Sync + 'static>(machine: &Machine<E, Env>) -> String {
    let mut out = String::from("stateDiagram-v2\n");
    let tree = machine.tree();
    let root = tree.root();

    for &child in tree.node(root).children() {
        mermaid_state(machine, child, 1, &mut out);
    }
    if let Some(initial) = tree.node(root).initial() {
        indent(&mut out, 1);
        out.push_str(&format!("[*] --> {}\n", alias(machine, initial)));
    }
    for info in machine.all_transitions() {
        indent(&mut out, 1);
        out.push_str(&transition_line(machine, &info));
        out.push('\n');
    }
    out
}

fn mermaid_state<E: Event, Env: Clone + Send + Sync + 'static>(
    machine: &Machine<E, Env>,
    id: StateId,
    depth: usize,
    out: &mut String,
) {
    let tree = machine.tree();
    let node = tree.node(id);
    let name = alias(machine, id);

    indent(out, depth);
    match node.kind() {
        StateKind::Choice => {
            out.push_str(&format!("state {name} <<choice>>\n"));
            return;
        }
        StateKind::History { kind, .. } => {
            let note = match kind {
                HistoryKind::Shallow => "shallow history",
                HistoryKind::Deep => "deep history",
            };
            out.push_str(&format!("state \"{} ({note})\" as {name}\n", node.name()));
            return;
        }
        StateKind::Final | StateKind::Plain | StateKind::Data { .. } => {}
    }

    if node.is_leaf() {
        out.push_str(&format!("state \"{}\" as {name}\n", node.name()));
        return;
    }

    out.push_str(&format!("state {name} {{\n"));
    match node.child_mode() {
        ChildMode::Exclusive => {
            if let Some(initial) = node.initial() {
                indent(out, depth + 1);
                out.push_str(&format!("[*] --> {}\n", alias(machine, initial)));
            }
            for &child in node.children() {
                mermaid_state(machine, child, depth + 1, out);
            }
        }
        ChildMode::Parallel => {
            let mut first = true;
            for &child in node.children() {
                if !first {
                    indent(out, depth + 1);
                    out.push_str("--\n");
                }
                first = false;
                mermaid_state(machine, child, depth + 1, out);
            }
        }
    }
    indent(out, depth);
    out.push_str("}\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MachineBuilder;

    #[derive(Clone, Debug)]
    enum Ev {
        Go,
    }

    impl Event for Ev {
        fn label(&self) -> &str {
            "Go"
        }
    }

    fn traffic_light() -> Machine<Ev, ()> {
        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("light");
        let green = builder.state(builder.root(), "green").unwrap();
        let yellow = builder.state(builder.root(), "yellow").unwrap();
        let red = builder.state(builder.root(), "red").unwrap();
        builder.initial(builder.root(), green).unwrap();
        builder
            .transition(green, yellow, |_| true, Some("slow down"))
            .unwrap();
        builder.transition(yellow, red, |_| true, Some("stop")).unwrap();
        builder.transition(red, green, |_| true, Some("go")).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn plantuml_renders_states_initial_and_transitions() {
        let machine = traffic_light();
        let text = plantuml(&machine);

        assert!(text.starts_with("@startuml\n"));
        assert!(text.ends_with("@enduml\n"));
        assert!(text.contains("state \"green\" as light_green"));
        assert!(text.contains("[*] --> light_green"));
        assert!(text.contains("light_green --> light_yellow : slow down"));
    }

    #[test]
    fn export_is_deterministic() {
        let first = plantuml(&traffic_light());
        let second = plantuml(&traffic_light());
        assert_eq!(first, second);

        let m1 = mermaid(&traffic_light());
        let m2 = mermaid(&traffic_light());
        assert_eq!(m1, m2);
    }

    #[test]
    fn mermaid_nests_composites_and_separates_parallel_regions() {
        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
        let par = builder.parallel_state(builder.root(), "par").unwrap();
        builder.initial(builder.root(), par).unwrap();
        let r1 = builder.state(par, "r1").unwrap();
        let r2 = builder.state(par, "r2").unwrap();
        let r1a = builder.state(r1, "a").unwrap();
        builder.initial(r1, r1a).unwrap();
        let r2a = builder.state(r2, "a").unwrap();
        builder.initial(r2, r2a).unwrap();
        let machine = builder.build().unwrap();

        let text = mermaid(&machine);
        assert!(text.starts_with("stateDiagram-v2\n"));
        assert!(text.contains("state root_par {"));
        assert!(text.contains("--"));
        assert!(text.contains("state \"a\" as root_par_r1_a"));
        assert!(text.contains("state \"a\" as root_par_r2_a"));
    }

    #[test]
    fn conditional_transitions_stay_visible() {
        let mut builder: MachineBuilder<Ev, ()> = MachineBuilder::new("root");
        let a = builder.state(builder.root(), "a").unwrap();
        builder.initial(builder.root(), a).unwrap();
        builder
            .transition_when_fn(
                a,
                |_| true,
                |_| Ok(crate::core::Direction::None),
                Some("maybe"),
            )
            .unwrap();
        let machine = builder.build().unwrap();

        let text = plantuml(&machine);
        assert!(text.contains("root_a --> root_a : maybe [conditional]"));
    }
}
