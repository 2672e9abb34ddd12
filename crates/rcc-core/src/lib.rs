//! rcc-core: stable foundation for the robot control core.
//!
//! Contains:
//! - ids (process-unique compact IDs for primitives and rules)
//! - error (shared error types)
//! - value (port value rendering/parsing)
//! - device (device model, registry, lock scopes)
//! - status (replaying status cells and the notification queue)

pub mod device;
pub mod error;
pub mod ids;
pub mod status;
pub mod value;

// Re-exports: nice ergonomics for downstream crates
pub use device::{
    Device, DeviceAccess, DeviceRegistry, DeviceStatus, DeviceUse, LockScope, ScalarActuator,
    ScalarSensor, SCALAR_ACTUATOR, SCALAR_SENSOR,
};
pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use status::{Notifier, StatusCell};
pub use value::PortValue;
