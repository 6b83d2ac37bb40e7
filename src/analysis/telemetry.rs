use crate::plan::{BuildOutput, ExecutionPlan, PlanOp};
use std::collections::BTreeMap;
use std::fmt;

/// Summary counts of a built plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanTelemetry {
    /// Node count per [`PlanOp::kind`].
    pub nodes_by_kind: BTreeMap<&'static str, usize>,
    /// Per-partition accumulators read back from the cache.
    pub cache_entries_decoded: usize,
    /// Per-partition accumulators scheduled to be written.
    pub cache_entries_encoded: usize,
    /// Phase snapshots actually created (fully cached phases create none).
    pub snapshots_created: usize,
    pub partitionable_nodes: usize,
    pub phases: usize,
}

impl PlanTelemetry {
    pub fn collect(plan: &ExecutionPlan) -> Self {
        let mut stats = Self::default();
        for (_, node) in plan.nodes() {
            *stats.nodes_by_kind.entry(node.op.kind()).or_insert(0) += 1;
            if node.partitionable {
                stats.partitionable_nodes += 1;
            }
            match node.op {
                PlanOp::CacheRead { .. } => stats.cache_entries_decoded += 1,
                PlanOp::CacheWrite { .. } => stats.cache_entries_encoded += 1,
                PlanOp::Snapshot { phase: Some(_), .. } => stats.snapshots_created += 1,
                _ => {}
            }
        }
        stats
    }

    pub fn from_build(output: &BuildOutput) -> Self {
        Self { phases: output.phases, ..Self::collect(&output.plan) }
    }

    pub fn node_count(&self) -> usize { self.nodes_by_kind.values().sum() }

    pub fn count(&self, kind: &str) -> usize { self.nodes_by_kind.get(kind).copied().unwrap_or(0) }
}

impl fmt::Display for PlanTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "phases: {} ({} snapshots)", self.phases, self.snapshots_created)?;
        writeln!(
            f,
            "nodes: {} ({} partitionable)",
            self.node_count(),
            self.partitionable_nodes
        )?;
        writeln!(
            f,
            "cache: {} decoded, {} encoded",
            self.cache_entries_decoded, self.cache_entries_encoded
        )?;
        for (kind, count) in &self.nodes_by_kind {
            writeln!(f, "  {:<12} {}", kind, count)?;
        }
        Ok(())
    }
}
