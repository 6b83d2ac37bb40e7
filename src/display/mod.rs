//! Human-readable renderings of plans and unique paths.
pub mod dot;
pub mod trace;

pub use dot::plan_to_dot;
pub use trace::describe_path;
