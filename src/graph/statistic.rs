//! Statistic declarations: a labelled chain of stages reading graph values
//! and binding its results to placeholders of the same graph.

use super::types::{ParamValue, Params, ValueId};
use crate::error::GraphError;
use serde::{Deserialize, Serialize};

/// Coder names used by the stock statistics.
pub const JSON_CACHE_CODER: &str = "JsonCacheCoder";
pub const VOCABULARY_CACHE_CODER: &str = "VocabularyAccumulatorCoder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageRole {
    /// Elementwise work on one partition.
    Transform,
    /// Partition-local fold of a combiner.
    Accumulate,
    /// Partition-agnostic combine of all accumulators.
    Merge,
    /// Post-merge work (pruning, ordering, writing).
    Finalize,
}

impl StageRole {
    #[inline]
    pub const fn is_partitionable(self) -> bool {
        matches!(self, Self::Transform | Self::Accumulate)
    }
}

/// One step of a statistic. The combiner behind it is opaque to the
/// planner and identified only by `name` and `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,
    pub role: StageRole,
    pub params: Params,
    pub num_outputs: u32,
    pub cache_coder: Option<String>,
}

impl StageDef {
    pub fn new(name: impl Into<String>, role: StageRole) -> Self {
        Self {
            name: name.into(),
            role,
            params: Params::new(),
            num_outputs: 1,
            cache_coder: None,
        }
    }

    pub fn transform(name: impl Into<String>) -> Self { Self::new(name, StageRole::Transform) }
    pub fn accumulate(name: impl Into<String>) -> Self { Self::new(name, StageRole::Accumulate) }
    pub fn merge(name: impl Into<String>) -> Self { Self::new(name, StageRole::Merge) }
    pub fn finalize(name: impl Into<String>) -> Self { Self::new(name, StageRole::Finalize) }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_outputs(mut self, num_outputs: u32) -> Self {
        self.num_outputs = num_outputs;
        self
    }

    pub fn with_cache_coder(mut self, coder: impl Into<String>) -> Self {
        self.cache_coder = Some(coder.into());
        self
    }

    #[inline]
    pub fn is_partitionable(&self) -> bool { self.role.is_partitionable() }

    /// Only partition-local stages can be cached per partition.
    #[inline]
    pub fn is_cacheable(&self) -> bool {
        self.is_partitionable() && self.cache_coder.is_some()
    }

    /// `Name[stat]`, the label shared by every instance of this stage.
    pub fn label(&self, statistic: &str) -> String {
        format!("{}[{}]", self.name, statistic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticDef {
    /// Caller-supplied hierarchical label, e.g. `x/mean_and_var`.
    pub label: String,
    pub inputs: Vec<ValueId>,
    pub stages: Vec<StageDef>,
    /// Placeholders bound to the outputs of the last stage.
    pub outputs: Vec<ValueId>,
}

impl StatisticDef {
    /// Index of the first non-partitionable stage (the merge).
    pub fn partition_boundary(&self) -> usize {
        self.stages
            .iter()
            .position(|s| !s.is_partitionable())
            .unwrap_or(self.stages.len())
    }

    pub fn partitionable_stages(&self) -> &[StageDef] {
        &self.stages[..self.partition_boundary()]
    }

    pub fn merge_stages(&self) -> &[StageDef] {
        &self.stages[self.partition_boundary()..]
    }

    pub fn has_cacheable_stage(&self) -> bool {
        self.partitionable_stages().iter().any(StageDef::is_cacheable)
    }

    pub fn num_outputs(&self) -> u32 {
        self.stages.last().map(|s| s.num_outputs).unwrap_or(0)
    }
}

/// Checks the shape of a stage chain before it enters the graph.
pub fn validate_stages(label: &str, stages: &[StageDef]) -> Result<(), GraphError> {
    let invalid = |reason: &str| GraphError::InvalidStatistic {
        label: label.to_string(),
        reason: reason.to_string(),
    };

    if label.trim().is_empty() {
        return Err(invalid("empty label"));
    }
    let Some(last) = stages.last() else {
        return Err(invalid("no stages"));
    };
    if last.num_outputs == 0 {
        return Err(invalid("last stage produces no outputs"));
    }
    if let Some(stage) = stages.iter().find(|s| s.num_outputs == 0) {
        return Err(invalid(&format!("stage `{}` produces no outputs", stage.name)));
    }

    let boundary = stages.iter().position(|s| !s.is_partitionable());
    match boundary {
        None => return Err(invalid("missing a merge stage")),
        Some(idx) if stages[idx].role != StageRole::Merge => {
            return Err(invalid(&format!(
                "first non-partitionable stage `{}` must be a merge",
                stages[idx].name
            )));
        }
        Some(idx) => {
            if let Some(stage) = stages[idx..].iter().find(|s| s.is_partitionable()) {
                return Err(invalid(&format!(
                    "partitionable stage `{}` follows the merge",
                    stage.name
                )));
            }
        }
    }
    Ok(())
}

/// A cacheable combiner: per-partition accumulate, then merge.
pub fn combine_stages(combiner: &str, params: Params, num_outputs: u32) -> Vec<StageDef> {
    let mut accumulate = StageDef::accumulate("CacheableCombineAccumulate")
        .with_param("combiner", combiner)
        .with_cache_coder(JSON_CACHE_CODER);
    accumulate.params.extend(params.clone());
    let mut merge = StageDef::merge("CacheableCombineMerge")
        .with_param("combiner", combiner)
        .with_outputs(num_outputs);
    merge.params.extend(params);
    vec![accumulate, merge]
}

/// Frequency vocabulary: accumulate token counts, merge, prune, write.
pub fn vocabulary_stages(
    vocab_filename: &str,
    top_k: Option<i64>,
    frequency_threshold: Option<i64>,
) -> Vec<StageDef> {
    vec![
        StageDef::accumulate("VocabularyAccumulate")
            .with_param("input_dtype", "string")
            .with_cache_coder(VOCABULARY_CACHE_CODER),
        StageDef::merge("VocabularyMerge"),
        StageDef::finalize("VocabularyPrune")
            .with_param("top_k", top_k)
            .with_param("frequency_threshold", frequency_threshold),
        StageDef::finalize("VocabularyOrderAndWrite").with_param("vocab_filename", vocab_filename),
    ]
}
