//! Control-core facade for the robot control runtime.
//!
//! This crate ties the graph, net and scheduling layers together behind
//! [`ControlCore`]: registries of primitive types, device factories and
//! device interfaces, net loading from fragments or YAML descriptions, the
//! public scheduling API, device lifecycle notification and one-shot
//! evaluation.

pub mod config;
pub mod control;
pub mod description;
pub mod devices;
pub mod error;
pub mod registry;

pub use config::CoreConfig;
pub use control::ControlCore;
pub use description::{
    ConnectionDef, DeviceDef, FragmentDescription, ParameterValue, PrimitiveDef, Scenario,
};
pub use devices::{
    DeviceDirectory, DeviceListener, DeviceRecord, JointParams, SimulatedJoint, SIM_JOINT,
};
pub use error::{AppError, AppResult, ValidationError};
pub use registry::{
    DeviceFactory, DeviceFactoryRegistry, DeviceInterfaceRegistry, PrimitiveFactory,
    PrimitiveRegistry, Registries,
};
