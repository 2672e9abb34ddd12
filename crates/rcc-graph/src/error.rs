//! Graph construction and execution errors.

use rcc_core::CoreError;
use thiserror::Error;

/// Result type for graph construction operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type for per-cycle primitive callbacks.
pub type PrimitiveResult<T> = Result<T, PrimitiveError>;

/// Load-time structural errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// The children of a fragment depend on each other in a cycle.
    #[error("Net cycle detected in fragment '{fragment}' among: {}", .involved.join(", "))]
    CycleDetected {
        fragment: String,
        involved: Vec<String>,
    },

    /// Fragment boundary ports forward to each other in a loop.
    #[error("Forwarding loop through port '{port}' of fragment '{fragment}'")]
    ForwardingLoop { fragment: String, port: String },

    /// A port name is declared twice on one primitive.
    #[error("Duplicate port '{port}' on primitive '{primitive}'")]
    DuplicatePort { primitive: String, port: String },

    /// A parameter name is declared twice on one primitive.
    #[error("Duplicate parameter '{parameter}' on primitive '{primitive}'")]
    DuplicateParameter {
        primitive: String,
        parameter: String,
    },

    /// Port lookup by name failed.
    #[error("Primitive '{primitive}' has no port '{port}'")]
    UnknownPort { primitive: String, port: String },

    /// Parameter lookup by name failed.
    #[error("Primitive '{primitive}' has no parameter '{parameter}'")]
    UnknownParameter {
        primitive: String,
        parameter: String,
    },

    /// A parameter value could not be parsed.
    #[error("Invalid value for parameter '{parameter}': {source}")]
    InvalidParameter {
        parameter: String,
        #[source]
        source: CoreError,
    },

    /// Connecting ports that carry different value types.
    #[error("Port '{port}' carries {expected}, cannot connect to {found}")]
    PortTypeMismatch {
        port: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A primitive was attached to a second net.
    #[error("Primitive '{primitive}' is already attached to net '{net}'")]
    AlreadyAttached { primitive: String, net: String },

    /// A child lookup inside a fragment failed.
    #[error("Fragment '{fragment}' has no child '{child}'")]
    UnknownChild { fragment: String, child: String },

    /// Invalid argument provided to a graph function.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: String },
}

/// Runtime-fatal failures raised from inside a cycle callback.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PrimitiveError {
    #[error("Primitive '{primitive}' is not attached to a net")]
    NotAttached { primitive: String },

    #[error("Primitive '{primitive}' failed: {what}")]
    Failed { primitive: String, what: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}
