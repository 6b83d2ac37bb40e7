//! dag.rs
//! The execution plan: a petgraph DAG of plan nodes. Edge weights are the
//! output slot of the producing node.

use super::node::PlanNode;
use crate::error::PlanError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::HashMap;

pub type PlanNodeId = NodeIndex;

#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    graph: DiGraph<PlanNode, u32>,
    by_label: HashMap<String, PlanNodeId>,
}

#[derive(Serialize)]
struct ExportedNode<'a> {
    id: usize,
    #[serde(flatten)]
    node: &'a PlanNode,
}

#[derive(Serialize)]
struct ExportedEdge {
    from: usize,
    to: usize,
    slot: u32,
}

#[derive(Serialize)]
struct ExportedPlan<'a> {
    nodes: Vec<ExportedNode<'a>>,
    edges: Vec<ExportedEdge>,
}

impl ExecutionPlan {
    pub fn new() -> Self { Self::default() }

    /// Adds `node` reading `(producer, slot)` pairs. Labels are made unique
    /// by suffixing `_1`, `_2`, ...
    pub(crate) fn add_node(&mut self, mut node: PlanNode, inputs: &[(PlanNodeId, u32)]) -> PlanNodeId {
        let base = node.label.clone();
        let mut counter = 1;
        while self.by_label.contains_key(&node.label) {
            node.label = format!("{}_{}", base, counter);
            counter += 1;
        }
        let label = node.label.clone();
        let id = self.graph.add_node(node);
        for &(producer, slot) in inputs {
            self.graph.add_edge(producer, id, slot);
        }
        self.by_label.insert(label, id);
        id
    }

    pub fn node(&self, id: PlanNodeId) -> Option<&PlanNode> { self.graph.node_weight(id) }

    pub fn find(&self, label: &str) -> Option<PlanNodeId> { self.by_label.get(label).copied() }

    pub fn node_count(&self) -> usize { self.graph.node_count() }

    pub fn edge_count(&self) -> usize { self.graph.edge_count() }

    pub fn nodes(&self) -> impl Iterator<Item = (PlanNodeId, &PlanNode)> {
        self.graph.node_indices().map(move |i| (i, &self.graph[i]))
    }

    /// Inputs of `id` as `(producer, slot)`, in the order they were added.
    pub fn inputs(&self, id: PlanNodeId) -> Vec<(PlanNodeId, u32)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.id(), e.source(), *e.weight()))
            .collect();
        edges.sort_by_key(|(edge, _, _)| *edge);
        edges.into_iter().map(|(_, src, slot)| (src, slot)).collect()
    }

    /// Distinct consumers of `id`, in insertion order.
    pub fn consumers(&self, id: PlanNodeId) -> Vec<PlanNodeId> {
        let mut out: Vec<_> = self.graph.neighbors_directed(id, Direction::Outgoing).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn topological_order(&self) -> Result<Vec<PlanNodeId>, PlanError> {
        toposort(&self.graph, None).map_err(|cycle| PlanError::CyclicPlan {
            label: self.graph[cycle.node_id()].label.clone(),
        })
    }

    pub(crate) fn inner(&self) -> &DiGraph<PlanNode, u32> { &self.graph }

    /// Node list plus `(from, to, slot)` edges, for an external engine.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let nodes = self
            .graph
            .node_indices()
            .map(|i| ExportedNode { id: i.index(), node: &self.graph[i] })
            .collect();
        let edges = self
            .graph
            .edge_references()
            .map(|e| ExportedEdge { from: e.source().index(), to: e.target().index(), slot: *e.weight() })
            .collect();
        serde_json::to_string_pretty(&ExportedPlan { nodes, edges })
    }
}
