//! Error types for graph construction and planning.
use thiserror::Error;

/// Misuse of the graph-building API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unknown value id {0}")]
    UnknownValue(u32),
    #[error("Unknown operation id {0}")]
    UnknownOperation(u32),
    #[error("Operation `{op}` has {num_outputs} outputs, slot {slot} is out of range")]
    SlotOutOfRange { op: String, slot: u32, num_outputs: u32 },
    #[error("Operation `{op}` is not a resource and cannot be initialized")]
    NotAResource { op: String },
    #[error("Invalid statistic `{label}`: {reason}")]
    InvalidStatistic { label: String, reason: String },
    #[error("`{owner}` reads value id {value}, which is not created before it")]
    ForwardReference { owner: String, value: u32 },
    #[error("Malformed graph: {0}")]
    Malformed(String),
}

/// Failure to restore a serialized graph.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to parse graph: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid graph: {0}")]
    Invalid(#[from] GraphError),
}

/// Fatal planning failures. Cache misses and non-fingerprintable
/// statistics are not errors; they are logged and planning continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error(
        "Initializer `{initializer}` depends on `{value}`, which is provided by initializer \
         `{provider}`; tables must be initializable in one pass"
    )]
    ChainedInitializers {
        initializer: String,
        value: String,
        provider: String,
    },
    #[error(
        "Initializer `{initializer}` depends on placeholder `{value}`; placeholders will not be \
         fed during table initialization"
    )]
    PlaceholderInInitializer { initializer: String, value: String },
    #[error(
        "Value `{value}` depends on `{placeholder}`, which is neither a declared input nor a bound \
         result; this may have been caused by manually adding a placeholder to the graph"
    )]
    ManuallyInjectedValue { value: String, placeholder: String },
    #[error(
        "Value `{value}` reads resource `{resource}` whose initializer `{initializer}` is not \
         tracked; this may be caused by adding an initializable table without registering its \
         initializer"
    )]
    UntrackedInitializer {
        value: String,
        resource: String,
        initializer: String,
    },
    #[error("Value id {0} is outside the analyzed graph")]
    UnknownValue(u32),
    #[error("Initializer id {0} is outside the analyzed graph")]
    UnknownInitializer(u32),
    #[error("No progress possible; unresolved: {pending:?}")]
    Unsatisfiable { pending: Vec<String> },
    #[error("Execution plan contains a cycle through `{label}`")]
    CyclicPlan { label: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
