//! builder.rs
//! Turns a computation graph into an execution plan, one phase at a time.
//!
//! Every round analyzes readiness with the statistic results bound so far,
//! plans the statistics whose inputs are ready, then binds their outputs.
//! Cache-eligible statistics run their partitionable stages once per
//! partition, reading cached accumulators where the index has them and
//! writing the fresh ones back.

use super::dag::{ExecutionPlan, PlanNodeId};
use super::node::{PlanNode, PlanOp};
use crate::analysis::readiness::ReadinessReport;
use crate::cache::key::{count_stale_entries, lookup};
use crate::cache::{Blake3Fingerprint, CacheIndex, CacheKey, FingerprintStrategy, Fingerprinter, PartitionKey};
use crate::config::PlannerConfig;
use crate::error::PlanError;
use crate::graph::{ComputationGraph, StageDef, StatisticDef, StatisticId, ValueId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Fresh cache writes: partition -> key -> `CacheWrite` node.
pub type CacheOutput = BTreeMap<PartitionKey, BTreeMap<CacheKey, PlanNodeId>>;

#[derive(Debug)]
pub struct BuildOutput {
    pub plan: ExecutionPlan,
    /// The final `CreateSavedModel` snapshot.
    pub final_result: PlanNodeId,
    pub cache_output: CacheOutput,
    pub phases: usize,
}

#[derive(Debug)]
pub struct PlanBuilder<'g> {
    graph: &'g ComputationGraph,
    config: PlannerConfig,
    fingerprint: Box<dyn FingerprintStrategy>,
}

impl<'g> PlanBuilder<'g> {
    pub fn new(graph: &'g ComputationGraph, config: PlannerConfig) -> Self {
        Self { graph, config, fingerprint: Box::new(Blake3Fingerprint) }
    }

    pub fn with_fingerprint(mut self, strategy: impl FingerprintStrategy + 'static) -> Self {
        self.fingerprint = Box::new(strategy);
        self
    }

    pub fn config(&self) -> &PlannerConfig { &self.config }

    /// Plans every statistic of the graph and the final transform.
    ///
    /// `partitions` may be given in any order; the analysis index of a
    /// partition is its position after sorting.
    pub fn build(
        &self,
        declared_inputs: &[ValueId],
        requested_outputs: &[ValueId],
        partitions: &[PartitionKey],
        cache_index: &CacheIndex,
    ) -> Result<BuildOutput, PlanError> {
        let graph = self.graph;
        if let Some(v) = declared_inputs
            .iter()
            .chain(requested_outputs)
            .find(|v| !graph.contains_value(**v))
        {
            return Err(PlanError::UnknownValue(v.0));
        }

        let version = self.config.cache_format_version.as_str();
        let stale = count_stale_entries(cache_index, version);
        if stale > 0 {
            info!(stale, version, "ignoring cache entries of another format version");
        }

        let mut state = BuildState {
            graph,
            config: &self.config,
            strategy: self.fingerprint.as_ref(),
            partitions: partitions.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect(),
            cache_index,
            statistic_outputs: graph
                .statistics()
                .flat_map(|(_, s)| s.outputs.iter().copied())
                .collect(),
            plan: ExecutionPlan::new(),
            cache_output: CacheOutput::new(),
            bindings: Vec::new(),
        };

        let mut resolved: BTreeMap<ValueId, bool> =
            state.statistic_outputs.iter().map(|v| (*v, false)).collect();
        let mut pending: Vec<StatisticId> = graph.statistics().map(|(id, _)| id).collect();
        let mut phase = 0;

        while !pending.is_empty() {
            let report = ReadinessReport::analyze(
                graph,
                declared_inputs.iter().copied(),
                resolved.iter().map(|(v, r)| (*v, *r)),
            )?;

            let mut ready = Vec::new();
            let mut waiting = Vec::new();
            for id in pending {
                let Some(stat) = graph.statistic(id) else { continue };
                if inputs_ready(&report, stat)? {
                    ready.push(stat);
                } else {
                    waiting.push(id);
                }
            }
            if ready.is_empty() {
                return Err(PlanError::Unsatisfiable {
                    pending: waiting
                        .iter()
                        .filter_map(|id| graph.statistic(*id))
                        .map(|s| s.label.clone())
                        .collect(),
                });
            }

            info!(phase, statistics = ready.len(), waiting = waiting.len(), "planning phase");
            let mut nodes = PhaseNodes::new(phase, &report, state.bindings.len());
            for stat in &ready {
                state.plan_statistic(&report, &mut nodes, stat)?;
            }
            for stat in &ready {
                for out in &stat.outputs {
                    resolved.insert(*out, true);
                }
            }
            pending = waiting;
            phase += 1;
        }

        let report = ReadinessReport::analyze(
            graph,
            declared_inputs.iter().copied(),
            resolved.iter().map(|(v, r)| (*v, *r)),
        )?;
        let mut unresolved = Vec::new();
        for &out in requested_outputs {
            if !report.ready_to_run(out)? {
                unresolved.push(graph.value_name(out).to_string());
            }
        }
        if !unresolved.is_empty() {
            return Err(PlanError::Unsatisfiable { pending: unresolved });
        }

        let inputs: Vec<_> = state.bindings.iter().map(|b| (*b, 0)).collect();
        let final_snapshot = PlanNode::new(
            "CreateSavedModel",
            PlanOp::Snapshot { phase: None, initializers: initializer_names(&report) },
            1,
        );
        let final_result = state.plan.add_node(final_snapshot, &inputs);

        info!(
            phases = phase,
            nodes = state.plan.node_count(),
            cache_writes = state.cache_output.values().map(|m| m.len()).sum::<usize>(),
            "execution plan built"
        );
        Ok(BuildOutput {
            plan: state.plan,
            final_result,
            cache_output: state.cache_output,
            phases: phase,
        })
    }
}

fn inputs_ready(report: &ReadinessReport<'_>, stat: &StatisticDef) -> Result<bool, PlanError> {
    for &input in &stat.inputs {
        if !report.ready_to_run(input)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn initializer_names(report: &ReadinessReport<'_>) -> Vec<String> {
    let graph = report.graph();
    report
        .ready_initializers()
        .into_iter()
        .filter_map(|id| graph.initializer(id))
        .map(|init| init.name.clone())
        .collect()
}

/// Nodes of the current phase, created on first use.
struct PhaseNodes {
    phase: usize,
    /// Bindings made before this phase started.
    prior_bindings: usize,
    initializers: Vec<String>,
    snapshot: Option<PlanNodeId>,
    flat_source: Option<PlanNodeId>,
    partition_sources: BTreeMap<usize, PlanNodeId>,
}

impl PhaseNodes {
    fn new(phase: usize, report: &ReadinessReport<'_>, prior_bindings: usize) -> Self {
        Self {
            phase,
            prior_bindings,
            initializers: initializer_names(report),
            snapshot: None,
            flat_source: None,
            partition_sources: BTreeMap::new(),
        }
    }
}

struct BuildState<'a> {
    graph: &'a ComputationGraph,
    config: &'a PlannerConfig,
    strategy: &'a dyn FingerprintStrategy,
    /// Sorted and deduplicated.
    partitions: Vec<PartitionKey>,
    cache_index: &'a CacheIndex,
    statistic_outputs: BTreeSet<ValueId>,
    plan: ExecutionPlan,
    cache_output: CacheOutput,
    bindings: Vec<PlanNodeId>,
}

impl<'a> BuildState<'a> {
    fn plan_statistic(
        &mut self,
        report: &ReadinessReport<'a>,
        nodes: &mut PhaseNodes,
        stat: &StatisticDef,
    ) -> Result<(), PlanError> {
        let mut tail = match self.cache_keys(report, stat)? {
            Some(keys) => self.plan_partitions(nodes, stat, &keys),
            None => {
                let mut tail = self.extract(nodes, stat, None);
                for stage in stat.partitionable_stages() {
                    tail = self.add_stage(stage.label(&stat.label), stage, tail);
                }
                tail
            }
        };
        for stage in stat.merge_stages() {
            tail = self.add_stage(stage.label(&stat.label), stage, tail);
        }

        for (slot, placeholder) in stat.outputs.iter().enumerate() {
            let name = self.graph.value_name(*placeholder);
            let node = PlanNode::new(
                format!("CreateTensorBinding[{}]", name),
                PlanOp::BindResult { placeholder: name.to_string() },
                1,
            );
            let bind = self.plan.add_node(node, &[(tail, slot as u32)]);
            self.bindings.push(bind);
        }
        Ok(())
    }

    /// One key per partitionable stage (`None` for stages without a coder),
    /// or `None` when the statistic cannot be cached.
    fn cache_keys(
        &self,
        report: &ReadinessReport<'a>,
        stat: &StatisticDef,
    ) -> Result<Option<Vec<Option<CacheKey>>>, PlanError> {
        if !self.config.enable_cache || self.partitions.is_empty() || !stat.has_cacheable_stage() {
            debug!(statistic = %stat.label, "statistic runs on the flattened dataset");
            return Ok(None);
        }

        let version = self.config.cache_format_version.as_str();
        let mut fingerprinter = Fingerprinter::new(version, &self.statistic_outputs);
        for (position, &input) in stat.inputs.iter().enumerate() {
            fingerprinter.add_input(report, position, input)?;
        }
        if !fingerprinter.opaque_ops().is_empty() {
            warn!(
                statistic = %stat.label,
                ops = ?fingerprinter.opaque_ops(),
                "statistic reads an opaque function and cannot be fingerprinted; caching disabled"
            );
            return Ok(None);
        }
        if !fingerprinter.bound_inputs().is_empty() {
            debug!(
                statistic = %stat.label,
                inputs = ?fingerprinter.bound_inputs(),
                "statistic reads results of an earlier phase; caching disabled"
            );
            return Ok(None);
        }

        let keys = (0..stat.partition_boundary())
            .map(|s| {
                stat.stages[s].is_cacheable().then(|| {
                    fingerprinter.stage_key(version, &stat.label, &stat.stages, s, self.strategy)
                })
            })
            .collect();
        Ok(Some(keys))
    }

    /// Per-partition prefix, then a `Flatten` of every partition's tail.
    fn plan_partitions(&mut self, nodes: &mut PhaseNodes, stat: &StatisticDef, keys: &[Option<CacheKey>]) -> PlanNodeId {
        let boundary = stat.partition_boundary();
        let config = self.config;
        let cache_index = self.cache_index;
        let mut tails = Vec::with_capacity(self.partitions.len());

        for index in 0..self.partitions.len() {
            let partition = self.partitions[index].clone();
            let hit = (0..boundary).rev().find_map(|s| {
                let key = keys.get(s)?.as_ref()?;
                lookup(cache_index, &partition, key, &config.cache_format_version).map(|_| (s, key.clone()))
            });

            let (mut tail, start) = match hit {
                Some((s, key)) => {
                    let stage = &stat.stages[s];
                    debug!(statistic = %stat.label, partition = %partition, stage = %stage.name, "cache hit");
                    let node = PlanNode::new(
                        format!("DecodeCache[{}][AnalysisIndex{}]", stage.label(&stat.label), index),
                        PlanOp::CacheRead {
                            key,
                            partition: partition.clone(),
                            coder: stage.cache_coder.clone().unwrap_or_default(),
                        },
                        stage.num_outputs,
                    );
                    (self.plan.add_node(node, &[]), s + 1)
                }
                None => (self.extract(nodes, stat, Some(index)), 0),
            };

            for (s, stage) in stat.stages.iter().enumerate().take(boundary).skip(start) {
                let stage_label = stage.label(&stat.label);
                tail = self.add_stage(format!("{}[AnalysisIndex{}]", stage_label, index), stage, tail);
                if let (Some(Some(key)), Some(coder)) = (keys.get(s), &stage.cache_coder) {
                    let node = PlanNode::new(
                        format!("EncodeCache[{}][AnalysisIndex{}]", stage_label, index),
                        PlanOp::CacheWrite { key: key.clone(), partition: partition.clone(), coder: coder.clone() },
                        1,
                    );
                    let inputs = self.all_outputs(tail);
                    let write = self.plan.add_node(node, &inputs);
                    self.cache_output.entry(partition.clone()).or_default().insert(key.clone(), write);
                }
            }
            tails.push(tail);
        }

        let width = boundary
            .checked_sub(1)
            .and_then(|s| stat.stages.get(s))
            .map_or(0, |s| s.num_outputs);
        let merge_label = stat
            .stages
            .get(boundary)
            .map(|s| s.label(&stat.label))
            .unwrap_or_else(|| stat.label.clone());
        let inputs: Vec<_> = tails
            .iter()
            .flat_map(|t| (0..width).map(move |slot| (*t, slot)))
            .collect();
        self.plan.add_node(
            PlanNode::new(format!("FlattenCache[{}]", merge_label), PlanOp::Flatten, width),
            &inputs,
        )
    }

    fn add_stage(&mut self, label: String, stage: &StageDef, input: PlanNodeId) -> PlanNodeId {
        let inputs = self.all_outputs(input);
        self.plan
            .add_node(PlanNode::new(label, PlanOp::for_stage(stage), stage.num_outputs), &inputs)
    }

    fn all_outputs(&self, id: PlanNodeId) -> Vec<(PlanNodeId, u32)> {
        let n = self.plan.node(id).map_or(0, |node| node.num_outputs);
        (0..n).map(|slot| (id, slot)).collect()
    }

    /// `TensorSource` for one partition, or for the flattened dataset.
    fn extract(&mut self, nodes: &mut PhaseNodes, stat: &StatisticDef, partition: Option<usize>) -> PlanNodeId {
        let (source, label) = match partition {
            Some(i) => (
                self.partition_source(nodes, i),
                format!("TensorSource[{}][AnalysisIndex{}]", stat.label, i),
            ),
            None => (self.flat_source(nodes), format!("TensorSource[{}]", stat.label)),
        };
        let values = stat
            .inputs
            .iter()
            .map(|v| self.graph.value_name(*v).to_string())
            .collect();
        let op = PlanOp::Extract { statistic: stat.label.clone(), values };
        self.plan
            .add_node(PlanNode::new(label, op, stat.inputs.len() as u32), &[(source, 0)])
    }

    fn snapshot(&mut self, nodes: &mut PhaseNodes) -> PlanNodeId {
        if let Some(id) = nodes.snapshot {
            return id;
        }
        let inputs: Vec<_> = self.bindings[..nodes.prior_bindings].iter().map(|b| (*b, 0)).collect();
        let node = PlanNode::new(
            format!("CreateSavedModelForAnalyzerInputs[Phase{}]", nodes.phase),
            PlanOp::Snapshot { phase: Some(nodes.phase), initializers: nodes.initializers.clone() },
            1,
        );
        let id = self.plan.add_node(node, &inputs);
        nodes.snapshot = Some(id);
        id
    }

    fn flat_source(&mut self, nodes: &mut PhaseNodes) -> PlanNodeId {
        if let Some(id) = nodes.flat_source {
            return id;
        }
        let snapshot = self.snapshot(nodes);
        let node = PlanNode::new(
            format!("ApplySavedModel[Phase{}]", nodes.phase),
            PlanOp::Source { phase: nodes.phase, partition: None },
            1,
        );
        let id = self.plan.add_node(node, &[(snapshot, 0)]);
        nodes.flat_source = Some(id);
        id
    }

    fn partition_source(&mut self, nodes: &mut PhaseNodes, index: usize) -> PlanNodeId {
        if let Some(id) = nodes.partition_sources.get(&index) {
            return *id;
        }
        let snapshot = self.snapshot(nodes);
        let node = PlanNode::new(
            format!("ApplySavedModel[Phase{}][AnalysisIndex{}]", nodes.phase, index),
            PlanOp::Source { phase: nodes.phase, partition: Some(self.partitions[index].clone()) },
            1,
        );
        let id = self.plan.add_node(node, &[(snapshot, 0)]);
        nodes.partition_sources.insert(index, id);
        id
    }
}
