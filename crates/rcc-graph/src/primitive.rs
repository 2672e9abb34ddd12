//! Primitive abstractions.
//!
//! A primitive is the atomic unit of computation in a net. It owns its
//! ports and parameters through a [`PrimitiveCore`] and implements up to four
//! per-cycle callbacks:
//! - **read_sensor**: pull fresh values from devices into out-ports
//! - **update_data**: compute, propagating values along connected ports
//! - **write_actuator**: push values to devices
//! - **update_netcomm**: export named values for external observation

use std::collections::{BTreeMap, BTreeSet};

use rcc_core::{DeviceAccess, DeviceUse, PortValue, PrimitiveId};

use crate::context::CycleContext;
use crate::error::{GraphError, GraphResult, PrimitiveResult};
use crate::parameter::{AnyParameter, Parameter};
use crate::port::{AnyInPort, AnyOutPort, CycleClock, InPort, OutPort};

/// What a primitive receives when it is attached to a net.
#[derive(Debug, Clone)]
pub struct NetBinding {
    pub net_name: String,
    pub clock: CycleClock,
}

impl NetBinding {
    pub fn new(net_name: impl Into<String>) -> Self {
        Self {
            net_name: net_name.into(),
            clock: CycleClock::new(),
        }
    }
}

/// Ports, parameters and device declarations shared by every primitive.
pub struct PrimitiveCore {
    id: PrimitiveId,
    type_name: String,
    name: String,
    inputs: BTreeMap<String, Box<dyn AnyInPort>>,
    outputs: BTreeMap<String, Box<dyn AnyOutPort>>,
    parameters: BTreeMap<String, Box<dyn AnyParameter>>,
    devices: Vec<DeviceUse>,
    net: Option<String>,
}

impl PrimitiveCore {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PrimitiveId::next(),
            type_name: type_name.into(),
            name: name.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            parameters: BTreeMap::new(),
            devices: Vec::new(),
            net: None,
        }
    }

    pub fn id(&self) -> PrimitiveId {
        self.id
    }

    /// Registered type name (e.g. `"Constant<f64>"`).
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Instance name, unique within the owning fragment by convention.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_port_name(&self, name: &str) -> GraphResult<()> {
        if self.inputs.contains_key(name) || self.outputs.contains_key(name) {
            return Err(GraphError::DuplicatePort {
                primitive: self.name.clone(),
                port: name.to_string(),
            });
        }
        Ok(())
    }

    /// Declare an in-port.
    pub fn in_port<T: PortValue>(&mut self, name: &str) -> GraphResult<InPort<T>> {
        self.check_port_name(name)?;
        let port = InPort::new(self.id, name);
        self.inputs.insert(name.to_string(), Box::new(port.clone()));
        Ok(port)
    }

    /// Declare an out-port.
    pub fn out_port<T: PortValue>(&mut self, name: &str) -> GraphResult<OutPort<T>> {
        self.check_port_name(name)?;
        let port = OutPort::new(self.id, name);
        self.outputs.insert(name.to_string(), Box::new(port.clone()));
        Ok(port)
    }

    /// Declare a parameter with a default value.
    pub fn parameter<T: PortValue>(&mut self, name: &str, default: T) -> GraphResult<Parameter<T>> {
        if self.parameters.contains_key(name) {
            return Err(GraphError::DuplicateParameter {
                primitive: self.name.clone(),
                parameter: name.to_string(),
            });
        }
        let param = Parameter::new(name, default);
        self.parameters
            .insert(name.to_string(), Box::new(param.clone()));
        Ok(param)
    }

    /// Declare a port name the runtime itself relies on; fresh cores only.
    pub(crate) fn reserved_in_port<T: PortValue>(&mut self, name: &str) -> InPort<T> {
        let port = InPort::new(self.id, name);
        self.inputs.insert(name.to_string(), Box::new(port.clone()));
        port
    }

    pub(crate) fn reserved_out_port<T: PortValue>(&mut self, name: &str) -> OutPort<T> {
        let port = OutPort::new(self.id, name);
        self.outputs.insert(name.to_string(), Box::new(port.clone()));
        port
    }

    pub(crate) fn insert_in_port<T: PortValue>(&mut self, port: InPort<T>) -> GraphResult<()> {
        self.check_port_name(port.name())?;
        self.inputs.insert(port.name().to_string(), Box::new(port));
        Ok(())
    }

    pub(crate) fn insert_out_port<T: PortValue>(&mut self, port: OutPort<T>) -> GraphResult<()> {
        self.check_port_name(port.name())?;
        self.outputs.insert(port.name().to_string(), Box::new(port));
        Ok(())
    }

    pub(crate) fn insert_boxed_out_port(&mut self, port: Box<dyn AnyOutPort>) -> GraphResult<()> {
        self.check_port_name(port.name())?;
        self.outputs.insert(port.name().to_string(), port);
        Ok(())
    }

    /// Declare that this primitive uses a device.
    pub fn uses_device(&mut self, device_use: DeviceUse) {
        if !self.devices.contains(&device_use) {
            self.devices.push(device_use);
        }
    }

    pub fn device_uses(&self) -> &[DeviceUse] {
        &self.devices
    }

    pub fn input(&self, name: &str) -> GraphResult<&dyn AnyInPort> {
        self.inputs
            .get(name)
            .map(|port| port.as_ref())
            .ok_or_else(|| GraphError::UnknownPort {
                primitive: self.name.clone(),
                port: name.to_string(),
            })
    }

    pub fn output(&self, name: &str) -> GraphResult<&dyn AnyOutPort> {
        self.outputs
            .get(name)
            .map(|port| port.as_ref())
            .ok_or_else(|| GraphError::UnknownPort {
                primitive: self.name.clone(),
                port: name.to_string(),
            })
    }

    pub fn parameter_by_name(&self, name: &str) -> GraphResult<&dyn AnyParameter> {
        self.parameters
            .get(name)
            .map(|param| param.as_ref())
            .ok_or_else(|| GraphError::UnknownParameter {
                primitive: self.name.clone(),
                parameter: name.to_string(),
            })
    }

    /// Typed handle of a declared in-port.
    pub fn typed_input<T: PortValue>(&self, name: &str) -> GraphResult<InPort<T>> {
        let port = self.input(name)?;
        port.as_any()
            .downcast_ref::<InPort<T>>()
            .cloned()
            .ok_or_else(|| GraphError::PortTypeMismatch {
                port: name.to_string(),
                expected: T::type_name(),
                found: port.value_type(),
            })
    }

    /// Typed handle of a declared out-port.
    pub fn typed_output<T: PortValue>(&self, name: &str) -> GraphResult<OutPort<T>> {
        let port = self.output(name)?;
        port.as_any()
            .downcast_ref::<OutPort<T>>()
            .cloned()
            .ok_or_else(|| GraphError::PortTypeMismatch {
                port: name.to_string(),
                expected: T::type_name(),
                found: port.value_type(),
            })
    }

    pub fn inputs(&self) -> impl Iterator<Item = &dyn AnyInPort> {
        self.inputs.values().map(|port| port.as_ref())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &dyn AnyOutPort> {
        self.outputs.values().map(|port| port.as_ref())
    }

    pub fn parameters(&self) -> impl Iterator<Item = &dyn AnyParameter> {
        self.parameters.values().map(|param| param.as_ref())
    }

    /// Owners of the out-ports this primitive's in-ports are connected to.
    pub fn referenced_primitives(&self) -> BTreeSet<PrimitiveId> {
        self.inputs
            .values()
            .filter_map(|port| port.source_owner())
            .collect()
    }

    /// Name of the net this primitive is attached to.
    pub fn net(&self) -> Option<&str> {
        self.net.as_deref()
    }

    /// Attach to a net: out-ports start stamping with the net's cycle clock.
    pub fn attach(&mut self, binding: &NetBinding) -> GraphResult<()> {
        if let Some(net) = &self.net {
            return Err(GraphError::AlreadyAttached {
                primitive: self.name.clone(),
                net: net.clone(),
            });
        }
        for port in self.outputs.values() {
            port.bind_clock(Some(&binding.clock));
        }
        self.net = Some(binding.net_name.clone());
        Ok(())
    }

    /// Detach from the net and sever every in-port connection.
    pub fn detach(&mut self) {
        for port in self.inputs.values() {
            port.disconnect();
        }
        for port in self.outputs.values() {
            port.bind_clock(None);
        }
        self.net = None;
    }
}

impl std::fmt::Debug for PrimitiveCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveCore")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("name", &self.name)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .field("net", &self.net)
            .finish()
    }
}

/// A node of the dataflow graph.
///
/// Implementors only need to expose their [`PrimitiveCore`] and override the
/// callbacks they care about.
pub trait Primitive: Send {
    fn core(&self) -> &PrimitiveCore;

    fn core_mut(&mut self) -> &mut PrimitiveCore;

    fn id(&self) -> PrimitiveId {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Attach to a net. Called once, before the first cycle.
    fn set_net(&mut self, binding: &NetBinding) -> GraphResult<()> {
        self.core_mut().attach(binding)
    }

    /// Detach from the net and sever in-port connections.
    fn cleanup(&mut self) {
        self.core_mut().detach();
    }

    fn read_sensor(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        Ok(())
    }

    fn update_data(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        Ok(())
    }

    fn write_actuator(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        Ok(())
    }

    fn update_netcomm(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        Ok(())
    }

    /// Primitives this one reads from in the same cycle.
    fn referenced_primitives(&self) -> BTreeSet<PrimitiveId> {
        self.core().referenced_primitives()
    }

    /// IDs of this primitive and everything nested inside it.
    fn descendant_ids(&self) -> BTreeSet<PrimitiveId> {
        BTreeSet::from([self.id()])
    }

    /// Devices this primitive (and anything nested inside it) uses.
    fn device_uses(&self) -> Vec<DeviceUse> {
        self.core().device_uses().to_vec()
    }

    /// Names of the actuator devices this primitive drives.
    fn actuators(&self) -> BTreeSet<String> {
        self.device_uses()
            .into_iter()
            .filter(|u| u.access == DeviceAccess::Actuator)
            .map(|u| u.device)
            .collect()
    }
}
