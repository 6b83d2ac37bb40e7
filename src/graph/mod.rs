//! Defines the raw computation graph consumed by the planner.
pub mod dag;
pub mod statistic;
pub mod storage;
pub mod types;

// Re-export key types for convenient access
pub use dag::ComputationGraph;
pub use statistic::{combine_stages, vocabulary_stages, StageDef, StageRole, StatisticDef};
pub use types::{
    InitializerId, Initializer, OpDef, OpId, ParamValue, Params, StatisticId, ValueId, ValueSource,
};
