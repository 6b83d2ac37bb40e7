//! storage.rs
//! Columnar storage for values and operations (CSR inputs per operation).

use super::statistic::{validate_stages, StatisticDef};
use super::types::*;
use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphRegistry {
    // Values
    pub value_sources: Vec<ValueSource>,
    pub value_names: Vec<String>,

    // Operations
    pub op_defs: Vec<OpDef>,
    pub op_names: Vec<String>,
    pub op_first_output: Vec<u32>,

    // Topology (CSR): inputs of each operation
    pub inputs_flat: Vec<ValueId>,
    pub inputs_ranges: Vec<(u32, u32)>, // (start, count)

    pub initializers: Vec<Initializer>,
    pub statistics: Vec<StatisticDef>,

    // Ephemeral state for uniqueness checks (Not serialized, rebuilt on load)
    #[serde(skip)]
    pub used_names: HashSet<String>,
}

impl GraphRegistry {
    pub fn new() -> Self { Self::default() }
    pub fn value_count(&self) -> usize { self.value_sources.len() }
    pub fn op_count(&self) -> usize { self.op_defs.len() }

    /// Rebuilds the `used_names` set after deserialization.
    pub fn rebuild_name_cache(&mut self) {
        self.used_names = self
            .value_names
            .iter()
            .chain(&self.op_names)
            .chain(self.initializers.iter().map(|i| &i.name))
            .cloned()
            .collect();
    }

    /// Returns `name`, or `name_1`, `name_2`, ... if it is already taken.
    pub fn unique_name(&mut self, name: &str) -> String {
        let mut candidate = name.to_string();
        let mut counter = 1;
        while self.used_names.contains(&candidate) {
            candidate = format!("{}_{}", name, counter);
            counter += 1;
        }
        self.used_names.insert(candidate.clone());
        candidate
    }

    pub fn push_value(&mut self, source: ValueSource, name: &str) -> ValueId {
        let id = ValueId::new(self.value_sources.len());
        let name = self.unique_name(name);
        self.value_sources.push(source);
        self.value_names.push(name);
        id
    }

    /// Registers an operation and one value per output, named `op:slot`.
    pub fn push_op(&mut self, def: OpDef, inputs: &[ValueId], name: &str) -> OpId {
        let id = OpId::new(self.op_defs.len());
        let name = self.unique_name(name);

        // 1. Register Inputs
        let start = self.inputs_flat.len() as u32;
        self.inputs_flat.extend_from_slice(inputs);
        self.inputs_ranges.push((start, inputs.len() as u32));

        // 2. Outputs
        self.op_first_output.push(self.value_sources.len() as u32);
        for slot in 0..def.num_outputs {
            self.push_value(ValueSource::Output { op: id, slot }, &format!("{}:{}", name, slot));
        }

        // 3. Metadata
        self.op_defs.push(def);
        self.op_names.push(name);
        id
    }

    /// Checks what the building API guarantees by construction: the columns
    /// agree in length and every reference points at an existing id. Op
    /// inputs must be created before the op's first output.
    pub fn validate(&self) -> Result<(), GraphError> {
        let ops = self.op_count();
        let values = self.value_count();
        if self.value_names.len() != values
            || self.op_names.len() != ops
            || self.op_first_output.len() != ops
            || self.inputs_ranges.len() != ops
        {
            return Err(GraphError::Malformed("column lengths differ".to_string()));
        }

        for (idx, source) in self.value_sources.iter().enumerate() {
            if let ValueSource::Output { op, slot } = source {
                if !self.contains_op(*op) {
                    return Err(GraphError::UnknownOperation(op.0));
                }
                let first = self.op_first_output[op.index()] as usize;
                if first + *slot as usize != idx {
                    return Err(GraphError::Malformed(format!(
                        "value `{}` is not output {} of `{}`",
                        self.value_names[idx], slot, self.op_names[op.index()]
                    )));
                }
            }
        }

        for (idx, def) in self.op_defs.iter().enumerate() {
            let id = OpId::new(idx);
            let name = &self.op_names[idx];
            let (start, count) = self.inputs_ranges[idx];
            if start as usize + count as usize > self.inputs_flat.len() {
                return Err(GraphError::Malformed(format!("inputs of `{}` are out of range", name)));
            }
            let first = self.op_first_output[idx] as usize;
            let outputs_match = (0..def.num_outputs).all(|slot| {
                self.value_sources.get(first + slot as usize) == Some(&ValueSource::Output { op: id, slot })
            });
            if !outputs_match {
                return Err(GraphError::Malformed(format!("outputs of `{}` are missing", name)));
            }
            if let Some(v) = self.get_inputs(id).iter().find(|v| v.index() >= first) {
                return Err(GraphError::ForwardReference { owner: name.clone(), value: v.0 });
            }
        }

        for init in &self.initializers {
            if !self.contains_op(init.resource) {
                return Err(GraphError::UnknownOperation(init.resource.0));
            }
            if !self.op_defs[init.resource.index()].resource {
                return Err(GraphError::NotAResource { op: self.op_names[init.resource.index()].clone() });
            }
            if let Some(v) = init.inputs.iter().find(|v| !self.contains_value(**v)) {
                return Err(GraphError::UnknownValue(v.0));
            }
        }

        let mut labels = HashSet::new();
        for stat in &self.statistics {
            validate_stages(&stat.label, &stat.stages)?;
            let invalid = |reason: &str| GraphError::InvalidStatistic {
                label: stat.label.clone(),
                reason: reason.to_string(),
            };
            if !labels.insert(stat.label.as_str()) {
                return Err(invalid("label already in use"));
            }
            if let Some(v) = stat.inputs.iter().chain(&stat.outputs).find(|v| !self.contains_value(**v)) {
                return Err(GraphError::UnknownValue(v.0));
            }
            if stat.outputs.iter().any(|v| self.value_sources[v.index()] != ValueSource::Placeholder) {
                return Err(invalid("outputs must be placeholders"));
            }
            let expected = stat.stages.last().map_or(0, |s| s.num_outputs as usize);
            if stat.outputs.len() != expected {
                return Err(invalid("output count differs from the last stage"));
            }
        }
        Ok(())
    }

    #[inline(always)]
    pub fn get_inputs(&self, id: OpId) -> &[ValueId] {
        let (start, count) = self.inputs_ranges[id.index()];
        &self.inputs_flat[start as usize..(start + count) as usize]
    }

    pub fn contains_value(&self, id: ValueId) -> bool { id.index() < self.value_count() }
    pub fn contains_op(&self, id: OpId) -> bool { id.index() < self.op_count() }
}
