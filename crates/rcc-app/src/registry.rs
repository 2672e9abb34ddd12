//! Registration tables consulted when graphs and devices are created by
//! name.
//!
//! The tables are built once (usually with [`Registries::standard`]) and
//! handed to the control core; nothing here is global.

use std::collections::BTreeMap;
use std::sync::Arc;

use rcc_core::{Device, PortValue, SCALAR_ACTUATOR, SCALAR_SENSOR};
use rcc_graph::{
    ActuatorWrite, And, Constant, CycleCounter, GraphResult, NetcommIn, NetcommOut, Primitive,
    SensorRead, StopAfter, Threshold,
};

use crate::devices::{JointParams, SimulatedJoint, SIM_JOINT};
use crate::error::{AppError, AppResult};

/// Creates a primitive with its ports and parameters declared.
pub type PrimitiveFactory = Arc<dyn Fn(&str) -> GraphResult<Box<dyn Primitive>> + Send + Sync>;

/// Creates a device from text parameters.
pub type DeviceFactory =
    Arc<dyn Fn(&BTreeMap<String, String>) -> AppResult<Arc<dyn Device>> + Send + Sync>;

/// Primitive type name to factory.
#[derive(Clone, Default)]
pub struct PrimitiveRegistry {
    factories: BTreeMap<String, PrimitiveFactory>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every primitive of the standard library.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_constant::<f64>();
        registry.register_constant::<bool>();
        registry.register_constant::<i64>();
        registry.register("CycleCounter", |name| Ok(Box::new(CycleCounter::new(name)?)));
        registry.register("Threshold", |name| Ok(Box::new(Threshold::new(name, 0.0)?)));
        registry.register("And", |name| Ok(Box::new(And::new(name)?)));
        registry.register("StopAfter", |name| Ok(Box::new(StopAfter::new(name, 1)?)));
        registry.register("SensorRead", |name| Ok(Box::new(SensorRead::new(name, "")?)));
        registry.register("ActuatorWrite", |name| {
            Ok(Box::new(ActuatorWrite::new(name, "")?))
        });
        registry.register_netcomm::<f64>();
        registry.register_netcomm::<bool>();
        registry
    }

    fn register_constant<T: PortValue + Default>(&mut self) {
        self.register(format!("Constant<{}>", T::type_name()), |name| {
            Ok(Box::new(Constant::new(name, T::default())?))
        });
    }

    fn register_netcomm<T: PortValue>(&mut self) {
        self.register(format!("NetcommOut<{}>", T::type_name()), |name| {
            Ok(Box::new(NetcommOut::<T>::new(name, name)?))
        });
        self.register(format!("NetcommIn<{}>", T::type_name()), |name| {
            Ok(Box::new(NetcommIn::<T>::new(name, name)?))
        });
    }

    /// Register (or replace) a factory.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        factory: impl Fn(&str) -> GraphResult<Box<dyn Primitive>> + Send + Sync + 'static,
    ) {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Create a primitive and apply text parameters to it.
    pub fn create(
        &self,
        type_name: &str,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> AppResult<Box<dyn Primitive>> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| AppError::UnknownPrimitiveType(type_name.to_string()))?;
        let primitive = factory(name)?;
        for (key, text) in params {
            primitive.core().parameter_by_name(key)?.set_text(text)?;
        }
        Ok(primitive)
    }
}

impl std::fmt::Debug for PrimitiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Device type name to factory.
#[derive(Clone, Default)]
pub struct DeviceFactoryRegistry {
    factories: BTreeMap<String, DeviceFactory>,
}

impl DeviceFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(SIM_JOINT, |params| {
            let joint = SimulatedJoint::new(JointParams::from_text(params)?)?;
            Ok(Arc::new(joint))
        });
        registry
    }

    pub fn register(
        &mut self,
        device_type: impl Into<String>,
        factory: impl Fn(&BTreeMap<String, String>) -> AppResult<Arc<dyn Device>>
        + Send
        + Sync
        + 'static,
    ) {
        self.factories.insert(device_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, device_type: &str) -> bool {
        self.factories.contains_key(device_type)
    }

    pub fn create(
        &self,
        device_type: &str,
        params: &BTreeMap<String, String>,
    ) -> AppResult<Arc<dyn Device>> {
        let factory = self
            .factories
            .get(device_type)
            .ok_or_else(|| AppError::UnknownDeviceType(device_type.to_string()))?;
        factory(params)
    }
}

impl std::fmt::Debug for DeviceFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Known device interfaces with a short description each.
#[derive(Debug, Clone, Default)]
pub struct DeviceInterfaceRegistry {
    interfaces: BTreeMap<String, String>,
}

impl DeviceInterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(SCALAR_SENSOR, "reads one scalar value");
        registry.register(SCALAR_ACTUATOR, "accepts one scalar command");
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.interfaces.insert(name.into(), description.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.interfaces.get(name).map(String::as_str)
    }
}

/// The three tables a control core consults.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub primitives: PrimitiveRegistry,
    pub devices: DeviceFactoryRegistry,
    pub interfaces: DeviceInterfaceRegistry,
}

impl Registries {
    pub fn standard() -> Self {
        Self {
            primitives: PrimitiveRegistry::standard(),
            devices: DeviceFactoryRegistry::standard(),
            interfaces: DeviceInterfaceRegistry::standard(),
        }
    }
}
