//! Graphviz export of an execution plan.
//!
//! Nodes are records `{kind|param: value|...|label: ...|partitionable: ...}`;
//! edges leaving multi-output nodes carry the output slot.

use crate::plan::{ExecutionPlan, PlanNode};
use petgraph::dot::{Config, Dot};
use petgraph::visit::EdgeRef;

fn escape_record(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '{' | '}' | '|' | '<' | '>' | '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn record_label(node: &PlanNode) -> String {
    let mut fields = vec![escape_record(node.op.display_name())];
    for (key, value) in node.op.params() {
        fields.push(escape_record(&format!("{}: {}", key, value)));
    }
    fields.push(escape_record(&format!("label: {}", node.label)));
    fields.push(format!(
        "partitionable: {}",
        if node.partitionable { "True" } else { "False" }
    ));
    format!("{{{}}}", fields.join("|"))
}

pub fn plan_to_dot(plan: &ExecutionPlan) -> String {
    let graph = plan.inner();
    let edge_attrs = |g: &petgraph::graph::DiGraph<PlanNode, u32>, e: petgraph::graph::EdgeReference<'_, u32>| {
        if g[e.source()].num_outputs > 1 {
            format!("label=\"{}\"", e.weight())
        } else {
            String::new()
        }
    };
    let node_attrs = |_: &petgraph::graph::DiGraph<PlanNode, u32>, (_, node): (petgraph::graph::NodeIndex, &PlanNode)| {
        format!("shape=record label=\"{}\"", record_label(node))
    };
    let dot = Dot::with_attr_getters(
        graph,
        &[Config::NodeNoLabel, Config::EdgeNoLabel],
        &edge_attrs,
        &node_attrs,
    );
    format!("{}", dot)
}
