//! Phased, cache-aware planning of dataset statistics.
//!
//! A [`graph::ComputationGraph`] declares statistics over its values. The
//! [`plan::PlanBuilder`] splits them into phases by readiness, rewrites the
//! partition-local part of cacheable statistics to reuse cached
//! accumulators, and emits an [`plan::ExecutionPlan`] for an external
//! engine.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod display;
pub mod error;
pub mod graph;
pub mod plan;

pub use analysis::{PlanTelemetry, ReadinessReport};
pub use cache::{CacheIndex, CacheKey, PartitionKey};
pub use config::PlannerConfig;
pub use error::{ConfigError, GraphError, LoadError, PlanError};
pub use graph::ComputationGraph;
pub use plan::{BuildOutput, ExecutionPlan, PlanBuilder};
