//! Static analyses over the computation graph and the built plan.
pub mod readiness;
pub mod telemetry;
pub mod topology;
pub mod unique_path;

#[cfg(test)]
pub(crate) mod test_graphs;

pub use readiness::ReadinessReport;
pub use telemetry::PlanTelemetry;
pub use unique_path::{PathNode, PathVisitor};
