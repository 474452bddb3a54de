//! Graphviz export of a build plan

use std::fmt::Write;

use super::task::BuildPlan;

/// Renders the plan as a DOT digraph
///
/// One node per task (ID, labelled with its kind and origin), one edge per
/// dependency pointing from the dependency to the dependent. Nodes and edges
/// come out in plan order, so equal plans render byte-identical.
pub fn to_dot(plan: &BuildPlan) -> String {
    let mut out = String::from("digraph stbl {\n    rankdir=LR;\n    node [shape=box];\n");

    for task in &plan.tasks {
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\\n{}\"];",
            task.id,
            task.kind.label(),
            escape(&task.origin)
        );
    }

    for (from, to) in &plan.edges {
        let _ = writeln!(out, "    \"{}\" -> \"{}\";", from, to);
    }

    out.push_str("}\n");
    out
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
