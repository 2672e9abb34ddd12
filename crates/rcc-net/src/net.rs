//! Nets: loaded, schedulable instances of a fragment graph.
//!
//! A [`NetHandle`] is the shared, cloneable view used by schedulers and
//! applications. The executable part, the [`Net`] owning the root fragment,
//! is parked inside the handle while the net is `READY` and is moved into an
//! [`ActiveNet`] when an executor starts it. Only the executor thread ever
//! touches an active net's graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use parking_lot::Mutex;
use rcc_core::{DeviceAccess, DeviceRegistry, Notifier, StatusCell};
use rcc_graph::{CycleClock, CycleContext, Fragment, NetBinding, OUT_CANCEL, Primitive};

use crate::error::{NetError, NetResult};
use crate::netcomm::{NetcommListener, NetcommTable, NetcommUpdate, NetcommValue};
use crate::status::NetStatus;

/// Static properties of a net.
#[derive(Debug, Clone, PartialEq)]
pub struct NetConfig {
    pub name: String,
    pub description: String,
    /// Realtime nets are paced to their cycle time and report lag.
    pub realtime: bool,
    pub cycle_time: Duration,
}

impl NetConfig {
    pub fn new(name: impl Into<String>, cycle_time: Duration) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            realtime: true,
            cycle_time,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

/// Result of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    /// The completion signal was raised this cycle.
    Completed,
}

/// Why a net stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Killed,
    Failed(String),
}

struct NetShared {
    config: NetConfig,
    status: StatusCell<NetStatus>,
    cancel_requested: AtomicBool,
    kill_requested: AtomicBool,
    completed: AtomicBool,
    killed: AtomicBool,
    failure: Mutex<Option<String>>,
    successor: Mutex<Option<NetHandle>>,
    sensors: BTreeSet<String>,
    actuators: BTreeSet<String>,
    netcomm: Mutex<NetcommTable>,
    parked: Mutex<Option<Net>>,
    notifier: Notifier,
    clock: CycleClock,
}

/// Shared handle of a loaded net. Clones refer to the same net.
#[derive(Clone)]
pub struct NetHandle {
    shared: Arc<NetShared>,
}

/// The executable part of a net: its root fragment and device binding.
pub struct Net {
    root: Fragment,
    devices: Arc<DeviceRegistry>,
}

impl Net {
    /// Attach `root` to a new net and park it, `READY`, behind the returned
    /// handle.
    ///
    /// Fails without side effects when the graph cannot be attached (for
    /// example a same-cycle dependency cycle).
    pub fn load(
        mut root: Fragment,
        devices: Arc<DeviceRegistry>,
        config: NetConfig,
        notifier: Notifier,
    ) -> NetResult<NetHandle> {
        let binding = NetBinding::new(config.name.clone());
        root.set_net(&binding)?;

        let mut sensors = BTreeSet::new();
        let mut actuators = BTreeSet::new();
        for device_use in root.device_uses() {
            match device_use.access {
                DeviceAccess::Sensor => sensors.insert(device_use.device),
                DeviceAccess::Actuator => actuators.insert(device_use.device),
            };
        }

        tracing::debug!(net = %config.name, ?actuators, "net loaded");
        Ok(NetHandle {
            shared: Arc::new(NetShared {
                config,
                status: StatusCell::new(NetStatus::Ready),
                cancel_requested: AtomicBool::new(false),
                kill_requested: AtomicBool::new(false),
                completed: AtomicBool::new(false),
                killed: AtomicBool::new(false),
                failure: Mutex::new(None),
                successor: Mutex::new(None),
                sensors,
                actuators,
                netcomm: Mutex::new(NetcommTable::default()),
                parked: Mutex::new(Some(Net { root, devices })),
                notifier,
                clock: binding.clock,
            }),
        })
    }
}

impl NetHandle {
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn description(&self) -> &str {
        &self.shared.config.description
    }

    pub fn config(&self) -> &NetConfig {
        &self.shared.config
    }

    pub fn is_realtime(&self) -> bool {
        self.shared.config.realtime
    }

    pub fn cycle_time(&self) -> Duration {
        self.shared.config.cycle_time
    }

    pub fn status(&self) -> NetStatus {
        self.shared.status.get()
    }

    /// Status channel; the current status is delivered first.
    pub fn subscribe(&self) -> Receiver<NetStatus> {
        self.shared.status.subscribe()
    }

    /// Status callback run on the notification thread; the current status
    /// is delivered first.
    pub fn listen(&self, callback: impl Fn(NetStatus) + Send + Sync + 'static) {
        self.shared.status.listen(&self.shared.notifier, callback);
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::Acquire)
    }

    pub fn kill_requested(&self) -> bool {
        self.shared.kill_requested.load(Ordering::Acquire)
    }

    /// Message of the runtime failure that terminated the net, if any.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    /// Number of cycles executed so far.
    pub fn cycles(&self) -> u64 {
        self.shared.clock.now()
    }

    /// Request a cooperative stop.
    ///
    /// A running net keeps cycling with its `outCancel` flag raised and is
    /// expected to complete on its own. A net that never started terminates
    /// immediately. Returns `false` if the net had already terminated.
    pub fn cancel(&self) -> bool {
        self.shared.cancel_requested.store(true, Ordering::Release);
        let previous = self.shared.status.transition(|s| match s {
            NetStatus::Running => Some(NetStatus::Cancelling),
            NetStatus::Ready => Some(NetStatus::Terminated),
            _ => None,
        });
        match previous {
            Some(NetStatus::Ready) => {
                self.discard_parked();
                tracing::debug!(net = %self.name(), "cancelled before start");
                true
            }
            Some(_) => {
                tracing::debug!(net = %self.name(), "cancel requested");
                true
            }
            None => self.status() == NetStatus::Cancelling,
        }
    }

    /// Stop the net unconditionally at the next cycle boundary.
    ///
    /// A net that never started terminates immediately. Returns `false` if
    /// the net had already terminated.
    pub fn kill(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.shared.kill_requested.store(true, Ordering::Release);
        let previous = self.shared.status.transition(|s| match s {
            NetStatus::Ready => Some(NetStatus::Terminated),
            _ => None,
        });
        if previous.is_some() {
            self.shared.killed.store(true, Ordering::Release);
            self.discard_parked();
            tracing::debug!(net = %self.name(), "killed before start");
        }
        true
    }

    fn discard_parked(&self) {
        if let Some(mut net) = self.shared.parked.lock().take() {
            net.root.cleanup();
        }
    }

    /// Release a `READY` net that will never run. Returns `false` for nets
    /// that are active.
    pub fn unload(&self) -> bool {
        let previous = self.shared.status.transition(|s| match s {
            NetStatus::Ready => Some(NetStatus::Terminated),
            _ => None,
        });
        match previous {
            Some(_) => {
                self.discard_parked();
                tracing::debug!(net = %self.name(), "net unloaded");
                true
            }
            None => !self.status().is_active(),
        }
    }

    pub fn successor(&self) -> Option<NetHandle> {
        self.shared.successor.lock().clone()
    }

    /// Net to start as soon as this one completes or is killed.
    pub fn set_successor(&self, successor: Option<NetHandle>) {
        *self.shared.successor.lock() = successor;
    }

    pub fn take_successor(&self) -> Option<NetHandle> {
        self.shared.successor.lock().take()
    }

    /// Actuator devices driven by this net.
    pub fn actuators(&self) -> &BTreeSet<String> {
        &self.shared.actuators
    }

    /// Sensor devices read by this net.
    pub fn sensors(&self) -> &BTreeSet<String> {
        &self.shared.sensors
    }

    /// Whether the two nets drive a common actuator.
    pub fn overlaps(&self, other: &NetHandle) -> bool {
        !self.shared.actuators.is_disjoint(&other.shared.actuators)
    }

    /// Latest value published under `key`.
    pub fn netcomm(&self, key: &str) -> Option<NetcommValue> {
        self.shared.netcomm.lock().get(key).cloned()
    }

    /// Latest values of all published keys.
    pub fn netcomm_snapshot(&self) -> BTreeMap<String, String> {
        self.shared.netcomm.lock().snapshot()
    }

    /// Write a value for `NetcommIn` primitives to read from the next cycle.
    pub fn set_netcomm(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared
            .netcomm
            .lock()
            .write_incoming(key.into(), value.into());
    }

    /// Register a listener for every published batch. Runs on the
    /// notification thread.
    pub fn add_netcomm_listener(&self, listener: impl Fn(&NetcommUpdate) + Send + Sync + 'static) {
        let listener: NetcommListener = Arc::new(listener);
        self.shared.netcomm.lock().add_listener(listener);
    }

    /// Block until the net terminated or `timeout` elapsed. Returns the last
    /// observed status.
    pub fn wait_terminated(&self, timeout: Option<Duration>) -> NetStatus {
        self.shared.status.wait_until(NetStatus::is_terminal, timeout)
    }

    /// Take the parked net for execution and mark it `RUNNING`.
    pub fn activate(&self) -> NetResult<ActiveNet> {
        let previous = self.shared.status.transition(|s| match s {
            NetStatus::Ready => Some(NetStatus::Running),
            _ => None,
        });
        if previous.is_none() {
            return Err(NetError::NotReady {
                net: self.name().to_string(),
                status: self.status(),
            });
        }
        match self.shared.parked.lock().take() {
            Some(net) => {
                tracing::debug!(net = %self.name(), "net running");
                Ok(ActiveNet {
                    handle: self.clone(),
                    net,
                })
            }
            None => {
                self.shared.status.set(NetStatus::Terminated);
                Err(NetError::NotReady {
                    net: self.name().to_string(),
                    status: NetStatus::Terminated,
                })
            }
        }
    }

    /// Whether both handles refer to the same net.
    pub fn same(&self, other: &NetHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl PartialEq for NetHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for NetHandle {}

impl fmt::Debug for NetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetHandle")
            .field("name", &self.name())
            .field("status", &self.status())
            .field("cycles", &self.cycles())
            .finish()
    }
}

/// A running net, owned by the executor.
pub struct ActiveNet {
    handle: NetHandle,
    net: Net,
}

impl ActiveNet {
    pub fn handle(&self) -> &NetHandle {
        &self.handle
    }

    /// Execute one cycle: read sensors, update data, write actuators and
    /// publish netcomm values.
    pub fn run_cycle(&mut self) -> NetResult<CycleOutcome> {
        let shared = &self.handle.shared;
        let cycle = shared.clock.advance();
        let root = &mut self.net.root;
        root.set_cancel_flag(shared.cancel_requested.load(Ordering::Acquire));

        let incoming = shared.netcomm.lock().incoming();
        let mut outgoing = BTreeMap::new();
        let devices = self.net.devices.as_ref();
        let fail = |source| NetError::CycleFailed {
            net: shared.config.name.clone(),
            cycle,
            source,
        };
        {
            let mut ctx = CycleContext::new(
                cycle,
                &shared.config.name,
                shared.config.realtime,
                devices,
                &incoming,
                &mut outgoing,
            );
            {
                let _scope = devices.lock_sensors(&shared.sensors);
                root.read_sensor(&mut ctx).map_err(fail)?;
            }
            root.update_data(&mut ctx).map_err(fail)?;
            {
                let _scope = devices.lock_actuators(&shared.actuators);
                root.write_actuator(&mut ctx).map_err(fail)?;
            }
            root.update_netcomm(&mut ctx).map_err(fail)?;
        }
        shared
            .netcomm
            .lock()
            .publish(&shared.config.name, cycle, outgoing, &shared.notifier);

        if root.is_completed() {
            Ok(CycleOutcome::Completed)
        } else {
            Ok(CycleOutcome::Continue)
        }
    }

    /// [`run_cycle`](Self::run_cycle) with panics in primitive callbacks
    /// turned into [`NetError::Panicked`].
    pub fn run_cycle_guarded(&mut self) -> NetResult<CycleOutcome> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())) {
            Ok(result) => result,
            Err(payload) => {
                let what = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(NetError::Panicked {
                    net: self.handle.name().to_string(),
                    cycle: self.handle.cycles(),
                    what,
                })
            }
        }
    }

    /// Current values of the root fragment's outputs in text form.
    ///
    /// Outputs that were never written are omitted.
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.net
            .root
            .core()
            .outputs()
            .filter(|port| port.name() != OUT_CANCEL)
            .filter_map(|port| port.render().map(|v| (port.name().to_string(), v)))
            .collect()
    }

    /// Detach the graph and mark the net `TERMINATED`.
    pub fn terminate(mut self, cause: Termination) -> NetHandle {
        self.net.root.cleanup();
        let shared = &self.handle.shared;
        match &cause {
            Termination::Completed => shared.completed.store(true, Ordering::Release),
            Termination::Killed => shared.killed.store(true, Ordering::Release),
            Termination::Failed(what) => *shared.failure.lock() = Some(what.clone()),
        }
        shared.status.set(NetStatus::Terminated);
        match &cause {
            Termination::Failed(what) => {
                tracing::error!(net = %self.handle.name(), %what, "net failed");
            }
            _ => tracing::debug!(net = %self.handle.name(), ?cause, "net terminated"),
        }
        self.handle
    }
}

impl fmt::Debug for ActiveNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveNet")
            .field("handle", &self.handle)
            .finish()
    }
}
