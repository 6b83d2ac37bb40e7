//! Operation nodes of the execution plan.

use crate::cache::{CacheKey, PartitionKey};
use crate::graph::{StageDef, StageRole};
use serde::Serialize;
use std::fmt;

/// What a plan node asks the execution engine to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum PlanOp {
    /// Bundles the graph with every binding made so far. `phase` is `None`
    /// for the final transform.
    Snapshot { phase: Option<usize>, initializers: Vec<String> },
    /// Applies a phase snapshot to one partition, or to the flattened
    /// dataset when `partition` is `None`.
    Source { phase: usize, partition: Option<PartitionKey> },
    /// Picks the inputs of one statistic out of a source.
    Extract { statistic: String, values: Vec<String> },
    Transform { stage: StageDef },
    Accumulate { stage: StageDef },
    /// Concatenates per-partition results ahead of a merge.
    Flatten,
    Merge { stage: StageDef },
    Finalize { stage: StageDef },
    /// Binds one statistic output to its placeholder.
    BindResult { placeholder: String },
    CacheRead { key: CacheKey, partition: PartitionKey, coder: String },
    CacheWrite { key: CacheKey, partition: PartitionKey, coder: String },
}

impl PlanOp {
    pub fn for_stage(stage: &StageDef) -> Self {
        let stage = stage.clone();
        match stage.role {
            StageRole::Transform => PlanOp::Transform { stage },
            StageRole::Accumulate => PlanOp::Accumulate { stage },
            StageRole::Merge => PlanOp::Merge { stage },
            StageRole::Finalize => PlanOp::Finalize { stage },
        }
    }

    /// Variant name, used for grouping.
    pub fn kind(&self) -> &'static str {
        match self {
            PlanOp::Snapshot { .. } => "Snapshot",
            PlanOp::Source { .. } => "Source",
            PlanOp::Extract { .. } => "Extract",
            PlanOp::Transform { .. } => "Transform",
            PlanOp::Accumulate { .. } => "Accumulate",
            PlanOp::Flatten => "Flatten",
            PlanOp::Merge { .. } => "Merge",
            PlanOp::Finalize { .. } => "Finalize",
            PlanOp::BindResult { .. } => "BindResult",
            PlanOp::CacheRead { .. } => "CacheRead",
            PlanOp::CacheWrite { .. } => "CacheWrite",
        }
    }

    /// Name shown to people reading the plan.
    pub fn display_name(&self) -> &str {
        match self {
            PlanOp::Snapshot { phase: Some(_), .. } => "CreateSavedModelForAnalyzerInputs",
            PlanOp::Snapshot { phase: None, .. } => "CreateSavedModel",
            PlanOp::Source { .. } => "ApplySavedModel",
            PlanOp::Extract { .. } => "TensorSource",
            PlanOp::Transform { stage }
            | PlanOp::Accumulate { stage }
            | PlanOp::Merge { stage }
            | PlanOp::Finalize { stage } => &stage.name,
            PlanOp::Flatten => "FlattenCache",
            PlanOp::BindResult { .. } => "CreateTensorBinding",
            PlanOp::CacheRead { .. } => "DecodeCache",
            PlanOp::CacheWrite { .. } => "EncodeCache",
        }
    }

    /// Whether the op may run once per partition.
    pub fn is_partitionable(&self) -> bool {
        match self {
            PlanOp::Source { .. }
            | PlanOp::Extract { .. }
            | PlanOp::Transform { .. }
            | PlanOp::Accumulate { .. }
            | PlanOp::Flatten
            | PlanOp::CacheRead { .. }
            | PlanOp::CacheWrite { .. } => true,
            PlanOp::Snapshot { .. }
            | PlanOp::Merge { .. }
            | PlanOp::Finalize { .. }
            | PlanOp::BindResult { .. } => false,
        }
    }

    /// Parameters as `(name, rendered value)`, in a stable order.
    pub fn params(&self) -> Vec<(String, String)> {
        match self {
            PlanOp::Snapshot { phase, initializers } => {
                let mut out = Vec::new();
                if let Some(phase) = phase {
                    out.push(("phase".to_string(), phase.to_string()));
                }
                out.push(("table_initializers".to_string(), format!("{:?}", initializers)));
                out
            }
            PlanOp::Source { phase, partition } => {
                let mut out = vec![("phase".to_string(), phase.to_string())];
                if let Some(p) = partition {
                    out.push(("partition".to_string(), p.to_string()));
                }
                out
            }
            PlanOp::Extract { values, .. } => vec![("tensors".to_string(), format!("{:?}", values))],
            PlanOp::Transform { stage }
            | PlanOp::Accumulate { stage }
            | PlanOp::Merge { stage }
            | PlanOp::Finalize { stage } => stage
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            PlanOp::Flatten => Vec::new(),
            PlanOp::BindResult { placeholder } => vec![("tensor".to_string(), placeholder.clone())],
            PlanOp::CacheRead { key, partition, coder } | PlanOp::CacheWrite { key, partition, coder } => vec![
                ("cache_key".to_string(), key.to_string()),
                ("coder".to_string(), coder.clone()),
                ("partition".to_string(), partition.to_string()),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanNode {
    pub label: String,
    pub op: PlanOp,
    pub num_outputs: u32,
    pub partitionable: bool,
}

impl PlanNode {
    pub fn new(label: impl Into<String>, op: PlanOp, num_outputs: u32) -> Self {
        let partitionable = op.is_partitionable();
        Self { label: label.into(), op, num_outputs, partitionable }
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.label) }
}
