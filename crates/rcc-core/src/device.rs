//! Device model and registry.
//!
//! Devices are external collaborators: the control core only needs to look
//! them up by name (and optionally type), ask which interfaces they offer,
//! and bracket sensor reads and actuator writes with per-device lock scopes.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Interface name of devices that provide a scalar reading.
pub const SCALAR_SENSOR: &str = "scalar_sensor";
/// Interface name of devices that accept a scalar command.
pub const SCALAR_ACTUATOR: &str = "scalar_actuator";

/// Operational status reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Offline,
    Operational,
    SafeOperational,
}

/// Device providing a scalar reading.
pub trait ScalarSensor {
    fn read(&self) -> CoreResult<f64>;
}

/// Device accepting a scalar command.
pub trait ScalarActuator {
    fn command(&self, value: f64) -> CoreResult<()>;
}

/// A device known to the control core.
pub trait Device: Any + Send + Sync {
    /// Registered type name (e.g. `"sim_joint"`).
    fn device_type(&self) -> &str;

    /// Names of the interfaces this device implements.
    fn interfaces(&self) -> Vec<&'static str>;

    fn status(&self) -> DeviceStatus {
        DeviceStatus::Operational
    }

    fn as_any(&self) -> &dyn Any;

    fn scalar_sensor(&self) -> Option<&dyn ScalarSensor> {
        None
    }

    fn scalar_actuator(&self) -> Option<&dyn ScalarActuator> {
        None
    }
}

/// How a primitive uses a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceAccess {
    Sensor,
    Actuator,
}

/// Declaration that a primitive reads from or drives a named device through
/// a given interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceUse {
    pub device: String,
    pub interface: String,
    pub access: DeviceAccess,
}

impl DeviceUse {
    pub fn sensor(device: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            interface: interface.into(),
            access: DeviceAccess::Sensor,
        }
    }

    pub fn actuator(device: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            interface: interface.into(),
            access: DeviceAccess::Actuator,
        }
    }
}

struct DeviceEntry {
    device: Arc<dyn Device>,
    sensor_lock: Arc<Mutex<()>>,
    actuator_lock: Arc<Mutex<()>>,
}

/// Held device locks. Dropping the scope releases them.
pub struct LockScope {
    guards: Vec<ArcMutexGuard<RawMutex, ()>>,
}

impl LockScope {
    /// Number of device locks held by this scope.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Live registry of devices, shared between the control core and its nets.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: RwLock<BTreeMap<String, DeviceEntry>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under a unique name.
    pub fn insert(&self, name: impl Into<String>, device: Arc<dyn Device>) -> CoreResult<()> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(CoreError::DuplicateDevice { name });
        }
        entries.insert(
            name,
            DeviceEntry {
                device,
                sensor_lock: Arc::new(Mutex::new(())),
                actuator_lock: Arc::new(Mutex::new(())),
            },
        );
        Ok(())
    }

    /// Remove a device, returning it if it was registered.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.entries.write().remove(name).map(|entry| entry.device)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Names of all registered devices, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Look up a device by name.
    pub fn get(&self, name: &str) -> CoreResult<Arc<dyn Device>> {
        self.entries
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.device))
            .ok_or_else(|| CoreError::DeviceNotFound {
                name: name.to_string(),
            })
    }

    /// Look up a device by name and registered type.
    pub fn get_typed(&self, name: &str, device_type: &str) -> CoreResult<Arc<dyn Device>> {
        let device = self.get(name)?;
        if device.device_type() != device_type {
            return Err(CoreError::DeviceTypeMismatch {
                name: name.to_string(),
                expected: device_type.to_string(),
                actual: device.device_type().to_string(),
            });
        }
        Ok(device)
    }

    /// Acquire the sensor locks of the named devices.
    ///
    /// Locks are taken in name order so concurrent scopes cannot deadlock.
    /// Names that are not registered are skipped.
    pub fn lock_sensors<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> LockScope {
        self.lock_scope(names, |entry| Arc::clone(&entry.sensor_lock))
    }

    /// Acquire the actuator locks of the named devices.
    pub fn lock_actuators<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> LockScope {
        self.lock_scope(names, |entry| Arc::clone(&entry.actuator_lock))
    }

    fn lock_scope<'a>(
        &self,
        names: impl IntoIterator<Item = &'a String>,
        pick: impl Fn(&DeviceEntry) -> Arc<Mutex<()>>,
    ) -> LockScope {
        let mut locks: Vec<(&String, Arc<Mutex<()>>)> = {
            let entries = self.entries.read();
            names
                .into_iter()
                .filter_map(|name| entries.get(name).map(|entry| (name, pick(entry))))
                .collect()
        };
        locks.sort_by(|a, b| a.0.cmp(b.0));
        locks.dedup_by(|a, b| a.0 == b.0);
        LockScope {
            guards: locks.into_iter().map(|(_, lock)| lock.lock_arc()).collect(),
        }
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.names())
            .finish()
    }
}
