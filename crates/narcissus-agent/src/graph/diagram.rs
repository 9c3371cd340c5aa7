use std::collections::HashSet;
use std::fmt::Write;

use super::event::Event;
use super::workflow::Workflow;

/// Render the step graph as a Mermaid flowchart.
///
/// Nodes are steps; an edge `a -->|kind| b` means `a` declares it emits
/// `kind` and `b` accepts it. Kinds that no step emits are drawn as entry
/// edges from `START`, and the terminal kind as edges into `STOP`.
pub fn render_mermaid<E: Event>(workflow: &Workflow<E>) -> String {
    let steps = workflow.describe();
    let emitted: HashSet<E::Kind> = steps
        .iter()
        .flat_map(|s| s.emits.iter().copied())
        .collect();

    let mut out = String::from("graph TD\n");
    let _ = writeln!(out, "    START((START))");
    for step in &steps {
        let _ = writeln!(out, "    {}[{}]", sanitize_id(&step.name), label(step));
    }
    let _ = writeln!(out, "    STOP((STOP))");

    for step in &steps {
        for kind in step.accepts.iter().filter(|k| !emitted.contains(*k)) {
            let _ = writeln!(out, "    START -->|{}| {}", kind, sanitize_id(&step.name));
        }
    }

    for step in &steps {
        let from = sanitize_id(&step.name);
        for kind in &step.emits {
            if *kind == E::STOP {
                let _ = writeln!(out, "    {} -->|{}| STOP", from, kind);
                continue;
            }
            for &target in workflow.routes(*kind) {
                let _ = writeln!(
                    out,
                    "    {} -->|{}| {}",
                    from,
                    kind,
                    sanitize_id(workflow.step(target).name())
                );
            }
        }
    }

    out
}

fn label<K>(step: &super::workflow::StepInfo<K>) -> String {
    if step.workers > 1 {
        format!("{} x{}", step.name, step.workers)
    } else {
        step.name.clone()
    }
}

fn sanitize_id(s: &str) -> String {
    s.replace(['-', '.', ' '], "_")
}
