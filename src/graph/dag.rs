//! dag.rs
//! Wraps the low-level GraphRegistry with a checked building API and
//! read accessors used by the analyzers.

use super::statistic::{validate_stages, StageDef, StatisticDef};
use super::storage::GraphRegistry;
use super::types::*;
use crate::error::{GraphError, LoadError};
use serde::{Deserialize, Serialize};

/// The raw, user-authored computation graph.
///
/// Ids are only handed out for existing nodes and operations may only read
/// existing values, so creation order is always a topological order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputationGraph {
    pub(crate) store: GraphRegistry,
}

impl ComputationGraph {
    pub fn new() -> Self { Self::default() }

    /// Restores a graph exported with [`ComputationGraph::to_json`].
    ///
    /// The restored graph is validated, so the analyzers can rely on the
    /// same invariants as for a graph built through this API.
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        let mut graph: Self = serde_json::from_str(json)?;
        graph.store.validate()?;
        graph.store.rebuild_name_cache();
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    // --- Building ---

    pub fn add_placeholder(&mut self, name: &str) -> ValueId {
        self.store.push_value(ValueSource::Placeholder, name)
    }

    pub fn add_constant(&mut self, name: &str, value: impl Into<ParamValue>) -> ValueId {
        self.store.push_value(ValueSource::Constant(value.into()), name)
    }

    pub fn add_operation(&mut self, name: &str, def: OpDef, inputs: &[ValueId]) -> Result<OpId, GraphError> {
        self.check_values(inputs)?;
        Ok(self.store.push_op(def, inputs, name))
    }

    /// Adds a single-output operation and returns its output value.
    pub fn apply(&mut self, name: &str, def: OpDef, inputs: &[ValueId]) -> Result<ValueId, GraphError> {
        let op = self.add_operation(name, def.with_outputs(1), inputs)?;
        self.output(op, 0)
    }

    pub fn output(&self, op: OpId, slot: u32) -> Result<ValueId, GraphError> {
        if !self.store.contains_op(op) {
            return Err(GraphError::UnknownOperation(op.0));
        }
        let def = &self.store.op_defs[op.index()];
        if slot >= def.num_outputs {
            return Err(GraphError::SlotOutOfRange {
                op: self.store.op_names[op.index()].clone(),
                slot,
                num_outputs: def.num_outputs,
            });
        }
        Ok(ValueId(self.store.op_first_output[op.index()] + slot))
    }

    /// Registers (and tracks) the initializer of a resource operation.
    pub fn add_initializer(&mut self, name: &str, resource: OpId, inputs: &[ValueId]) -> Result<InitializerId, GraphError> {
        if !self.store.contains_op(resource) {
            return Err(GraphError::UnknownOperation(resource.0));
        }
        if !self.store.op_defs[resource.index()].resource {
            return Err(GraphError::NotAResource {
                op: self.store.op_names[resource.index()].clone(),
            });
        }
        self.check_values(inputs)?;
        let id = InitializerId::new(self.store.initializers.len());
        let name = self.store.unique_name(name);
        self.store.initializers.push(Initializer {
            name,
            resource,
            inputs: inputs.to_vec(),
            tracked: true,
        });
        Ok(id)
    }

    /// Removes an initializer from the set of initializers to run.
    pub fn untrack_initializer(&mut self, id: InitializerId) {
        if let Some(init) = self.store.initializers.get_mut(id.index()) {
            init.tracked = false;
        }
    }

    pub fn untrack_all_initializers(&mut self) {
        for init in &mut self.store.initializers {
            init.tracked = false;
        }
    }

    /// Declares a statistic over `inputs` and returns one placeholder per
    /// output of its last stage (`{label}/Placeholder`, `..._1`, ...).
    pub fn add_statistic(&mut self, label: &str, inputs: &[ValueId], stages: Vec<StageDef>) -> Result<Vec<ValueId>, GraphError> {
        validate_stages(label, &stages)?;
        self.check_values(inputs)?;
        if self.store.statistics.iter().any(|s| s.label == label) {
            return Err(GraphError::InvalidStatistic {
                label: label.to_string(),
                reason: "label already in use".to_string(),
            });
        }

        let num_outputs = stages.last().map(|s| s.num_outputs).unwrap_or(0);
        let placeholder_name = format!("{}/Placeholder", label);
        let outputs: Vec<ValueId> = (0..num_outputs)
            .map(|_| self.add_placeholder(&placeholder_name))
            .collect();

        self.store.statistics.push(StatisticDef {
            label: label.to_string(),
            inputs: inputs.to_vec(),
            stages,
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    fn check_values(&self, values: &[ValueId]) -> Result<(), GraphError> {
        match values.iter().find(|v| !self.store.contains_value(**v)) {
            Some(v) => Err(GraphError::UnknownValue(v.0)),
            None => Ok(()),
        }
    }

    // --- Accessors ---

    pub fn value_count(&self) -> usize { self.store.value_count() }
    pub fn op_count(&self) -> usize { self.store.op_count() }
    pub fn contains_value(&self, id: ValueId) -> bool { self.store.contains_value(id) }
    pub fn value_name(&self, id: ValueId) -> &str { &self.store.value_names[id.index()] }
    pub fn value_source(&self, id: ValueId) -> &ValueSource { &self.store.value_sources[id.index()] }
    pub fn op_name(&self, id: OpId) -> &str { &self.store.op_names[id.index()] }
    pub fn op_def(&self, id: OpId) -> &OpDef { &self.store.op_defs[id.index()] }
    pub fn op_inputs(&self, id: OpId) -> &[ValueId] { self.store.get_inputs(id) }

    pub fn value_by_name(&self, name: &str) -> Option<ValueId> {
        self.store.value_names.iter().position(|n| n == name).map(ValueId::new)
    }

    pub fn initializers(&self) -> impl Iterator<Item = (InitializerId, &Initializer)> {
        self.store
            .initializers
            .iter()
            .enumerate()
            .map(|(i, init)| (InitializerId::new(i), init))
    }

    pub fn initializer(&self, id: InitializerId) -> Option<&Initializer> {
        self.store.initializers.get(id.index())
    }

    /// The initializer registered for a resource op, preferring a tracked one.
    pub fn initializer_for(&self, resource: OpId) -> Option<InitializerId> {
        let mut fallback = None;
        for (id, init) in self.initializers() {
            if init.resource == resource {
                if init.tracked {
                    return Some(id);
                }
                fallback.get_or_insert(id);
            }
        }
        fallback
    }

    pub fn statistics(&self) -> impl Iterator<Item = (StatisticId, &StatisticDef)> {
        self.store
            .statistics
            .iter()
            .enumerate()
            .map(|(i, s)| (StatisticId::new(i), s))
    }

    pub fn statistic(&self, id: StatisticId) -> Option<&StatisticDef> {
        self.store.statistics.get(id.index())
    }
}
