//! Simulated devices and device lifecycle notification.
//!
//! [`SimulatedJoint`] stands in for a position-controlled joint: commands
//! pass through a first-order lag with rate limiting, and the position can
//! be read back as a scalar sensor.
//!
//! [`DeviceDirectory`] fans device lifecycle events out to
//! [`DeviceListener`]s on the notification queue and replays the known
//! devices to listeners that subscribe late.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rcc_core::{
    CoreError, CoreResult, Device, DeviceStatus, Notifier, PortValue, ScalarActuator,
    ScalarSensor, SCALAR_ACTUATOR, SCALAR_SENSOR,
};
use serde::{Deserialize, Serialize};

/// Device type name of [`SimulatedJoint`].
pub const SIM_JOINT: &str = "sim_joint";

/// Parameters of a simulated joint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointParams {
    /// Time constant (seconds), must be positive
    pub tau: f64,
    /// Rate limit (units/second), must be positive
    pub rate_limit: f64,
    pub min: f64,
    pub max: f64,
    pub initial: f64,
    /// Simulated time advanced per command (seconds), must be positive
    pub dt: f64,
}

impl Default for JointParams {
    fn default() -> Self {
        Self {
            tau: 0.1,
            rate_limit: 1.0,
            min: -std::f64::consts::PI,
            max: std::f64::consts::PI,
            initial: 0.0,
            dt: 0.01,
        }
    }
}

impl JointParams {
    /// Build from text parameters; missing keys keep their defaults.
    pub fn from_text(params: &BTreeMap<String, String>) -> CoreResult<Self> {
        let mut out = Self::default();
        for (key, text) in params {
            let slot = match key.as_str() {
                "tau" => &mut out.tau,
                "rate_limit" => &mut out.rate_limit,
                "min" => &mut out.min,
                "max" => &mut out.max,
                "initial" => &mut out.initial,
                "dt" => &mut out.dt,
                _ => {
                    return Err(CoreError::InvalidArg {
                        what: "unknown sim_joint parameter",
                    });
                }
            };
            *slot = f64::parse(text)?;
        }
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(self.tau > 0.0) {
            return Err(CoreError::InvalidArg {
                what: "tau must be positive",
            });
        }
        if !(self.rate_limit > 0.0) {
            return Err(CoreError::InvalidArg {
                what: "rate_limit must be positive",
            });
        }
        if !(self.dt > 0.0) {
            return Err(CoreError::InvalidArg {
                what: "dt must be positive",
            });
        }
        if !(self.min <= self.max) {
            return Err(CoreError::InvalidArg {
                what: "min must not exceed max",
            });
        }
        if !(self.min..=self.max).contains(&self.initial) {
            return Err(CoreError::InvalidArg {
                what: "initial position outside [min, max]",
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct JointState {
    position: f64,
    command: Option<f64>,
    status: DeviceStatus,
}

/// First-order joint with rate limiting.
///
/// Dynamics: `dpos/dt = (cmd - pos) / tau`, clamped to
/// `[-rate_limit, rate_limit]`. Every command advances the simulation by
/// `dt` using explicit Euler integration; the position is clamped to
/// `[min, max]`.
#[derive(Debug)]
pub struct SimulatedJoint {
    params: JointParams,
    state: Mutex<JointState>,
}

impl SimulatedJoint {
    pub fn new(params: JointParams) -> CoreResult<Self> {
        params.validate()?;
        Ok(Self {
            state: Mutex::new(JointState {
                position: params.initial,
                command: None,
                status: DeviceStatus::Operational,
            }),
            params,
        })
    }

    pub fn params(&self) -> &JointParams {
        &self.params
    }

    /// Position derivative, clamped to the rate limit.
    pub fn dpdt(&self, position: f64, command: f64) -> f64 {
        let raw = (command - position) / self.params.tau;
        raw.clamp(-self.params.rate_limit, self.params.rate_limit)
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn last_command(&self) -> Option<f64> {
        self.state.lock().command
    }

    pub fn set_status(&self, status: DeviceStatus) {
        self.state.lock().status = status;
    }

    fn offline(&self) -> CoreError {
        CoreError::DeviceIo {
            name: SIM_JOINT.to_string(),
            what: "device is offline".to_string(),
        }
    }
}

impl ScalarSensor for SimulatedJoint {
    fn read(&self) -> CoreResult<f64> {
        let state = self.state.lock();
        if state.status == DeviceStatus::Offline {
            return Err(self.offline());
        }
        Ok(state.position)
    }
}

impl ScalarActuator for SimulatedJoint {
    fn command(&self, value: f64) -> CoreResult<()> {
        if !value.is_finite() {
            return Err(CoreError::InvalidArg {
                what: "joint command must be finite",
            });
        }
        let mut state = self.state.lock();
        if state.status == DeviceStatus::Offline {
            return Err(self.offline());
        }
        let next = state.position + self.dpdt(state.position, value) * self.params.dt;
        state.position = next.clamp(self.params.min, self.params.max);
        state.command = Some(value);
        Ok(())
    }
}

impl Device for SimulatedJoint {
    fn device_type(&self) -> &str {
        SIM_JOINT
    }

    fn interfaces(&self) -> Vec<&'static str> {
        vec![SCALAR_SENSOR, SCALAR_ACTUATOR]
    }

    fn status(&self) -> DeviceStatus {
        self.state.lock().status
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn scalar_sensor(&self) -> Option<&dyn ScalarSensor> {
        Some(self)
    }

    fn scalar_actuator(&self) -> Option<&dyn ScalarActuator> {
        Some(self)
    }
}

/// Receiver of device lifecycle events. Called on the notification queue.
pub trait DeviceListener: Send + Sync {
    fn device_added(&self, name: &str, device_type: &str, params: &BTreeMap<String, String>);

    /// `None` means the status is unknown.
    fn device_status_changed(&self, name: &str, status: Option<DeviceStatus>);

    fn device_removed(&self, name: &str);
}

/// What the directory remembers about a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub device_type: String,
    pub params: BTreeMap<String, String>,
    pub status: Option<DeviceStatus>,
}

#[derive(Default)]
struct DirectoryState {
    records: BTreeMap<String, DeviceRecord>,
    listeners: Vec<Arc<dyn DeviceListener>>,
}

/// Device event fan-out with replay for late listeners.
pub struct DeviceDirectory {
    notifier: Notifier,
    state: Mutex<DirectoryState>,
}

impl DeviceDirectory {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            state: Mutex::new(DirectoryState::default()),
        }
    }

    pub fn added(&self, name: &str, device_type: &str, params: BTreeMap<String, String>) {
        let mut state = self.state.lock();
        state.records.insert(
            name.to_string(),
            DeviceRecord {
                device_type: device_type.to_string(),
                params: params.clone(),
                status: None,
            },
        );
        let (name, device_type) = (name.to_string(), device_type.to_string());
        self.fan_out(&state.listeners, move |l| l.device_added(&name, &device_type, &params));
    }

    /// Record a status change. Returns `false` for unknown devices.
    pub fn status_changed(&self, name: &str, status: Option<DeviceStatus>) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(name) else {
            tracing::debug!(device = %name, "status change for unknown device ignored");
            return false;
        };
        if record.status == status {
            return true;
        }
        record.status = status;
        let name = name.to_string();
        self.fan_out(&state.listeners, move |l| l.device_status_changed(&name, status));
        true
    }

    pub fn removed(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        if state.records.remove(name).is_none() {
            return false;
        }
        let name = name.to_string();
        self.fan_out(&state.listeners, move |l| l.device_removed(&name));
        true
    }

    /// Register a listener and replay every known device to it.
    pub fn add_listener(&self, listener: Arc<dyn DeviceListener>) {
        let mut state = self.state.lock();
        let replay: Vec<(String, DeviceRecord)> = state
            .records
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect();
        let target = Arc::clone(&listener);
        self.notifier.post(move || {
            for (name, record) in &replay {
                target.device_added(name, &record.device_type, &record.params);
                if record.status.is_some() {
                    target.device_status_changed(name, record.status);
                }
            }
        });
        state.listeners.push(listener);
    }

    pub fn record(&self, name: &str) -> Option<DeviceRecord> {
        self.state.lock().records.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.state.lock().records.keys().cloned().collect()
    }

    fn fan_out(
        &self,
        listeners: &[Arc<dyn DeviceListener>],
        event: impl Fn(&dyn DeviceListener) + Send + 'static,
    ) {
        let listeners = listeners.to_vec();
        self.notifier.post(move || {
            for listener in &listeners {
                event(listener.as_ref());
            }
        });
    }
}
