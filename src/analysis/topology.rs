use crate::error::GraphError;
use crate::graph::{ComputationGraph, ValueId, ValueSource};
use std::collections::BTreeSet;

/// Collects every value `outputs` depend on, themselves included.
///
/// Reading a resource output also depends on the inputs of the resource's
/// initializers, since the table contents come from them.
pub fn upstream_closure(graph: &ComputationGraph, outputs: &[ValueId]) -> Result<BTreeSet<ValueId>, GraphError> {
    if let Some(v) = outputs.iter().find(|v| !graph.contains_value(**v)) {
        return Err(GraphError::UnknownValue(v.0));
    }
    let mut visited = vec![false; graph.value_count()];
    for &out in outputs {
        visit(out, graph, &mut visited);
    }
    Ok(visited
        .iter()
        .enumerate()
        .filter(|(_, seen)| **seen)
        .map(|(i, _)| ValueId::new(i))
        .collect())
}

fn visit(value: ValueId, graph: &ComputationGraph, visited: &mut Vec<bool>) {
    if visited[value.index()] {
        return;
    }
    visited[value.index()] = true;

    if let ValueSource::Output { op, .. } = graph.value_source(value) {
        for &input in graph.op_inputs(*op) {
            visit(input, graph, visited);
        }
        if graph.op_def(*op).resource {
            for (_, init) in graph.initializers().filter(|(_, i)| i.resource == *op) {
                for &input in &init.inputs {
                    visit(input, graph, visited);
                }
            }
        }
    }
}

/// The subset of `inputs` that `outputs` actually depend on.
pub fn dependent_inputs(
    graph: &ComputationGraph,
    inputs: &[ValueId],
    outputs: &[ValueId],
) -> Result<BTreeSet<ValueId>, GraphError> {
    if let Some(v) = inputs.iter().find(|v| !graph.contains_value(**v)) {
        return Err(GraphError::UnknownValue(v.0));
    }
    let closure = upstream_closure(graph, outputs)?;
    Ok(inputs.iter().copied().filter(|v| closure.contains(v)).collect())
}
