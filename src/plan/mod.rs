//! Execution plan: operation nodes, the plan DAG and the phase builder.
pub mod builder;
pub mod dag;
pub mod node;

#[cfg(test)]
mod tests;

pub use builder::{BuildOutput, CacheOutput, PlanBuilder};
pub use dag::{ExecutionPlan, PlanNodeId};
pub use node::{PlanNode, PlanOp};
