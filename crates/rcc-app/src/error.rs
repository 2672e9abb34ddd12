//! Error types for the control-core facade.

use rcc_core::CoreError;
use rcc_graph::GraphError;
use rcc_net::NetError;
use rcc_sched::SchedError;

/// Problems found while validating a configuration or description.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate ID: {id} in {context}")]
    DuplicateId { id: String, context: String },

    #[error("Missing reference: {id} in {context}")]
    MissingReference { id: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Facade error type wrapping the lower crates' errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown primitive type '{0}'")]
    UnknownPrimitiveType(String),

    #[error("Unknown device type '{0}'")]
    UnknownDeviceType(String),

    #[error("Unknown device interface '{0}'")]
    UnknownDeviceInterface(String),

    #[error("Device '{device}' is not available")]
    DeviceUnavailable { device: String },

    #[error("Device '{device}' does not provide interface '{interface}'")]
    MissingDeviceInterface { device: String, interface: String },

    #[error("Net not found: {0}")]
    UnknownNet(String),

    #[error("Net '{0}' is active and cannot be unloaded")]
    NetActive(String),

    #[error("Start refused for {0}: not READY or actuators in use")]
    StartRefused(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for facade operations.
pub type AppResult<T> = Result<T, AppError>;
