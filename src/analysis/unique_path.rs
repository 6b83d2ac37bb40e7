//! Unique path extraction: a deterministic post-order walk over everything
//! a value depends on in the current phase, reported to a visitor.
//!
//! The walk first covers every ready initializer (their tables are part of
//! the phase state), then the requested value. Every distinct node is
//! reported once per call, after all of its parents.

use super::readiness::ReadinessReport;
use crate::error::PlanError;
use crate::graph::{Initializer, InitializerId, OpDef, OpId, ParamValue, ValueId, ValueSource};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;

/// A node of the unique path as seen by a [`PathVisitor`].
#[derive(Debug, Clone, PartialEq)]
pub enum PathNode<'a> {
    /// A placeholder or decided value fed from outside the phase, as
    /// `{name}$value`.
    External { id: ValueId, token: String },
    Constant { id: ValueId, name: &'a str, value: &'a ParamValue },
    /// Stand-in for a resource op; its state is covered by the initializer.
    Resource { op: OpId, name: &'a str },
    Operation { id: OpId, name: &'a str, def: &'a OpDef },
    Value { id: ValueId, name: &'a str, slot: u32 },
    Initializer { id: InitializerId, init: &'a Initializer },
}

impl fmt::Display for PathNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathNode::External { token, .. } => f.write_str(token),
            PathNode::Constant { name, .. }
            | PathNode::Resource { name, .. }
            | PathNode::Operation { name, .. }
            | PathNode::Value { name, .. } => f.write_str(name),
            PathNode::Initializer { init, .. } => f.write_str(&init.name),
        }
    }
}

/// Receives the nodes of a unique path. Ids returned for earlier nodes are
/// handed back as `parents` of later ones.
pub trait PathVisitor {
    type Id: Clone;

    fn visit(&mut self, node: PathNode<'_>, parents: &[Self::Id]) -> Self::Id;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeKey {
    Value(ValueId),
    Op(OpId),
}

struct Walker<'g, 'v, V: PathVisitor> {
    report: &'v ReadinessReport<'g>,
    visitor: &'v mut V,
    memo: HashMap<NodeKey, V::Id>,
}

impl<'g, 'v, V: PathVisitor> Walker<'g, 'v, V> {
    fn visit_value(&mut self, value: ValueId) -> V::Id {
        if let Some(id) = self.memo.get(&NodeKey::Value(value)) {
            return id.clone();
        }
        let graph = self.report.graph();
        let name = graph.value_name(value);
        let external = PathNode::External { id: value, token: format!("{}$value", name) };
        let id = match graph.value_source(value) {
            _ if self.report.resolved(value).is_some() => self.visitor.visit(external, &[]),
            ValueSource::Placeholder => self.visitor.visit(external, &[]),
            ValueSource::Constant(constant) => self
                .visitor
                .visit(PathNode::Constant { id: value, name, value: constant }, &[]),
            ValueSource::Output { op, slot } => {
                let producer = if graph.op_def(*op).resource {
                    self.visit_resource(*op)
                } else {
                    self.visit_op(*op)
                };
                self.visitor
                    .visit(PathNode::Value { id: value, name, slot: *slot }, &[producer])
            }
        };
        self.memo.insert(NodeKey::Value(value), id.clone());
        id
    }

    fn visit_resource(&mut self, op: OpId) -> V::Id {
        if let Some(id) = self.memo.get(&NodeKey::Op(op)) {
            return id.clone();
        }
        let name = self.report.graph().op_name(op);
        let id = self.visitor.visit(PathNode::Resource { op, name }, &[]);
        self.memo.insert(NodeKey::Op(op), id.clone());
        id
    }

    fn visit_op(&mut self, op: OpId) -> V::Id {
        if let Some(id) = self.memo.get(&NodeKey::Op(op)) {
            return id.clone();
        }
        let graph = self.report.graph();
        let parents: SmallVec<[V::Id; 4]> =
            graph.op_inputs(op).iter().map(|v| self.visit_value(*v)).collect();
        let node = PathNode::Operation { id: op, name: graph.op_name(op), def: graph.op_def(op) };
        let id = self.visitor.visit(node, &parents);
        self.memo.insert(NodeKey::Op(op), id.clone());
        id
    }

    fn visit_initializer(&mut self, id: InitializerId, init: &'g Initializer) {
        let parents: SmallVec<[V::Id; 4]> =
            init.inputs.iter().map(|v| self.visit_value(*v)).collect();
        self.visitor.visit(PathNode::Initializer { id, init }, &parents);
    }
}

impl<'g> ReadinessReport<'g> {
    /// Walks the unique path of `value`, returning the visitor's id for it.
    pub fn unique_path<V: PathVisitor>(&self, value: ValueId, visitor: &mut V) -> Result<V::Id, PlanError> {
        let graph = self.graph();
        if !graph.contains_value(value) {
            return Err(PlanError::UnknownValue(value.0));
        }
        let mut walker = Walker { report: self, visitor, memo: HashMap::new() };
        for id in self.ready_initializers() {
            if let Some(init) = graph.initializer(id) {
                walker.visit_initializer(id, init);
            }
        }
        Ok(walker.visit_value(value))
    }
}
