//! Standard primitives.
//!
//! Small building blocks that most nets need: constants, counters,
//! comparisons, completion after a number of cycles, scalar device I/O and
//! netcomm import/export.

use rcc_core::{CoreError, DeviceUse, PortValue, SCALAR_ACTUATOR, SCALAR_SENSOR};

use crate::context::CycleContext;
use crate::error::{GraphResult, PrimitiveResult};
use crate::parameter::Parameter;
use crate::port::{InPort, OutPort};
use crate::primitive::{Primitive, PrimitiveCore};

macro_rules! impl_core {
    () => {
        fn core(&self) -> &PrimitiveCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut PrimitiveCore {
            &mut self.core
        }
    };
}

/// Writes its `value` parameter to the `value` out-port every cycle.
pub struct Constant<T: PortValue> {
    core: PrimitiveCore,
    value: Parameter<T>,
    out: OutPort<T>,
}

impl<T: PortValue> Constant<T> {
    pub fn new(name: &str, value: T) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new(format!("Constant<{}>", T::type_name()), name);
        let value = core.parameter("value", value)?;
        let out = core.out_port("value")?;
        Ok(Self { core, value, out })
    }

    pub fn value(&self) -> Parameter<T> {
        self.value.clone()
    }

    pub fn out(&self) -> OutPort<T> {
        self.out.clone()
    }
}

impl<T: PortValue> Primitive for Constant<T> {
    impl_core!();

    fn update_data(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.out.set(self.value.get());
        Ok(())
    }
}

/// Publishes the net's cycle number.
pub struct CycleCounter {
    core: PrimitiveCore,
    out: OutPort<u64>,
}

impl CycleCounter {
    pub fn new(name: &str) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new("CycleCounter", name);
        let out = core.out_port("cycle")?;
        Ok(Self { core, out })
    }

    pub fn out(&self) -> OutPort<u64> {
        self.out.clone()
    }
}

impl Primitive for CycleCounter {
    impl_core!();

    fn update_data(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.out.set(ctx.cycle());
        Ok(())
    }
}

/// `reached = value >= limit`. Without an input value the output is cleared.
pub struct Threshold {
    core: PrimitiveCore,
    input: InPort<f64>,
    limit: Parameter<f64>,
    reached: OutPort<bool>,
}

impl Threshold {
    pub fn new(name: &str, limit: f64) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new("Threshold", name);
        let input = core.in_port("value")?;
        let limit = core.parameter("limit", limit)?;
        let reached = core.out_port("reached")?;
        Ok(Self {
            core,
            input,
            limit,
            reached,
        })
    }

    pub fn input(&self) -> InPort<f64> {
        self.input.clone()
    }

    pub fn reached(&self) -> OutPort<bool> {
        self.reached.clone()
    }
}

impl Primitive for Threshold {
    impl_core!();

    fn update_data(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        match self.input.get() {
            Some(value) => self.reached.set(value >= self.limit.get()),
            None => self.reached.clear(),
        }
        Ok(())
    }
}

/// Boolean conjunction of two inputs.
///
/// A `false` input decides the result; otherwise both inputs must be known.
pub struct And {
    core: PrimitiveCore,
    a: InPort<bool>,
    b: InPort<bool>,
    out: OutPort<bool>,
}

impl And {
    pub fn new(name: &str) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new("And", name);
        let a = core.in_port("a")?;
        let b = core.in_port("b")?;
        let out = core.out_port("value")?;
        Ok(Self { core, a, b, out })
    }

    pub fn a(&self) -> InPort<bool> {
        self.a.clone()
    }

    pub fn b(&self) -> InPort<bool> {
        self.b.clone()
    }

    pub fn out(&self) -> OutPort<bool> {
        self.out.clone()
    }
}

impl Primitive for And {
    impl_core!();

    fn update_data(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        match (self.a.get(), self.b.get()) {
            (Some(false), _) | (_, Some(false)) => self.out.set(false),
            (Some(true), Some(true)) => self.out.set(true),
            _ => self.out.clear(),
        }
        Ok(())
    }
}

/// Raises `done` once it has been updated `cycles` times.
///
/// Only counts cycles in which its fragment was active.
pub struct StopAfter {
    core: PrimitiveCore,
    cycles: Parameter<u64>,
    done: OutPort<bool>,
    seen: u64,
}

impl StopAfter {
    pub fn new(name: &str, cycles: u64) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new("StopAfter", name);
        let cycles = core.parameter("cycles", cycles)?;
        let done = core.out_port("done")?;
        Ok(Self {
            core,
            cycles,
            done,
            seen: 0,
        })
    }

    pub fn done(&self) -> OutPort<bool> {
        self.done.clone()
    }
}

impl Primitive for StopAfter {
    impl_core!();

    fn update_data(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.seen += 1;
        self.done.set(self.seen >= self.cycles.get());
        Ok(())
    }
}

/// Reads a scalar sensor device.
///
/// Device trouble is reported on the `error` port; the last good value
/// stays on `value`.
pub struct SensorRead {
    core: PrimitiveCore,
    device: Parameter<String>,
    value: OutPort<f64>,
    error: OutPort<bool>,
}

impl SensorRead {
    pub fn new(name: &str, device: &str) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new("SensorRead", name);
        let device = core.parameter("device", device.to_string())?;
        let value = core.out_port("value")?;
        let error = core.out_port("error")?;
        Ok(Self {
            core,
            device,
            value,
            error,
        })
    }

    pub fn value(&self) -> OutPort<f64> {
        self.value.clone()
    }

    pub fn error(&self) -> OutPort<bool> {
        self.error.clone()
    }
}

impl Primitive for SensorRead {
    impl_core!();

    fn read_sensor(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        let name = self.device.get();
        let reading = ctx.devices().get(&name).and_then(|device| {
            device
                .scalar_sensor()
                .ok_or_else(|| CoreError::DeviceIo {
                    name: name.clone(),
                    what: format!("no {SCALAR_SENSOR} interface"),
                })?
                .read()
        });
        match reading {
            Ok(v) => {
                self.value.set(v);
                self.error.set(false);
            }
            Err(err) => {
                tracing::debug!(primitive = self.core.name(), %err, "sensor read failed");
                self.error.set(true);
            }
        }
        Ok(())
    }

    fn device_uses(&self) -> Vec<DeviceUse> {
        let name = self.device.get();
        if name.is_empty() {
            return Vec::new();
        }
        vec![DeviceUse::sensor(name, SCALAR_SENSOR)]
    }
}

/// Commands a scalar actuator device with the `command` input.
pub struct ActuatorWrite {
    core: PrimitiveCore,
    device: Parameter<String>,
    command: InPort<f64>,
    error: OutPort<bool>,
}

impl ActuatorWrite {
    pub fn new(name: &str, device: &str) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new("ActuatorWrite", name);
        let device = core.parameter("device", device.to_string())?;
        let command = core.in_port("command")?;
        let error = core.out_port("error")?;
        Ok(Self {
            core,
            device,
            command,
            error,
        })
    }

    pub fn command(&self) -> InPort<f64> {
        self.command.clone()
    }

    pub fn error(&self) -> OutPort<bool> {
        self.error.clone()
    }
}

impl Primitive for ActuatorWrite {
    impl_core!();

    fn write_actuator(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        let Some(command) = self.command.get() else {
            return Ok(());
        };
        let name = self.device.get();
        let result = ctx.devices().get(&name).and_then(|device| {
            device
                .scalar_actuator()
                .ok_or_else(|| CoreError::DeviceIo {
                    name: name.clone(),
                    what: format!("no {SCALAR_ACTUATOR} interface"),
                })?
                .command(command)
        });
        if let Err(err) = &result {
            tracing::debug!(primitive = self.core.name(), %err, "actuator write failed");
        }
        self.error.set(result.is_err());
        Ok(())
    }

    fn device_uses(&self) -> Vec<DeviceUse> {
        let name = self.device.get();
        if name.is_empty() {
            return Vec::new();
        }
        vec![DeviceUse::actuator(name, SCALAR_ACTUATOR)]
    }
}

/// Exports its input under `key` for observation outside the net.
pub struct NetcommOut<T: PortValue> {
    core: PrimitiveCore,
    key: Parameter<String>,
    input: InPort<T>,
}

impl<T: PortValue> NetcommOut<T> {
    pub fn new(name: &str, key: &str) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new(format!("NetcommOut<{}>", T::type_name()), name);
        let key = core.parameter("key", key.to_string())?;
        let input = core.in_port("value")?;
        Ok(Self { core, key, input })
    }

    pub fn input(&self) -> InPort<T> {
        self.input.clone()
    }
}

impl<T: PortValue> Primitive for NetcommOut<T> {
    impl_core!();

    fn update_netcomm(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        if let Some(value) = self.input.get() {
            ctx.publish(self.key.get(), value.render());
        }
        Ok(())
    }
}

/// Imports the value the application wrote under `key`.
///
/// `valid` is false while nothing parseable has been written.
pub struct NetcommIn<T: PortValue> {
    core: PrimitiveCore,
    key: Parameter<String>,
    value: OutPort<T>,
    valid: OutPort<bool>,
}

impl<T: PortValue> NetcommIn<T> {
    pub fn new(name: &str, key: &str) -> GraphResult<Self> {
        let mut core = PrimitiveCore::new(format!("NetcommIn<{}>", T::type_name()), name);
        let key = core.parameter("key", key.to_string())?;
        let value = core.out_port("value")?;
        let valid = core.out_port("valid")?;
        Ok(Self {
            core,
            key,
            value,
            valid,
        })
    }

    pub fn value(&self) -> OutPort<T> {
        self.value.clone()
    }

    pub fn valid(&self) -> OutPort<bool> {
        self.valid.clone()
    }
}

impl<T: PortValue> Primitive for NetcommIn<T> {
    impl_core!();

    fn read_sensor(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        let parsed = ctx
            .netcomm_in(&self.key.get())
            .and_then(|text| T::parse(text).ok());
        match parsed {
            Some(value) => {
                self.value.set(value);
                self.valid.set(true);
            }
            None => self.valid.set(false),
        }
        Ok(())
    }
}
