//! The control-core facade.
//!
//! A [`ControlCore`] owns the live device registry, the executor and the
//! registration tables. It loads fragments into named nets, exposes the
//! scheduling API and evaluates fragments once, inline, for synchronous
//! reads.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rcc_core::{CoreError, Device, DeviceRegistry, DeviceStatus, Notifier};
use rcc_graph::{Fragment, Primitive};
use rcc_net::{Net, NetConfig, NetHandle, Termination};
use rcc_sched::{Condition, Executor, PassReport, RuleHandle, RuleStatus, SchedulingRule};

use crate::config::CoreConfig;
use crate::description::{FragmentDescription, Scenario};
use crate::devices::{DeviceDirectory, DeviceListener};
use crate::error::{AppError, AppResult};
use crate::registry::Registries;

pub struct ControlCore {
    config: CoreConfig,
    registries: Registries,
    devices: Arc<DeviceRegistry>,
    directory: DeviceDirectory,
    notifier: Notifier,
    executor: Executor,
    nets: Mutex<BTreeMap<String, NetHandle>>,
    next_net: AtomicU64,
}

impl ControlCore {
    /// Control core whose executor loop runs on its own thread.
    pub fn new(config: CoreConfig, registries: Registries) -> AppResult<Self> {
        Self::create(config, registries, false)
    }

    /// Control core whose executor only advances through
    /// [`step`](Self::step).
    pub fn manual(config: CoreConfig, registries: Registries) -> AppResult<Self> {
        Self::create(config, registries, true)
    }

    fn create(config: CoreConfig, registries: Registries, manual: bool) -> AppResult<Self> {
        config.validate()?;
        let notifier = Notifier::spawn(&config.notifier_thread_name)?;
        let executor = if manual {
            Executor::manual(config.executor_config(), notifier.clone())
        } else {
            Executor::threaded(config.executor_config(), notifier.clone())
        };
        Ok(Self {
            directory: DeviceDirectory::new(notifier.clone()),
            devices: Arc::new(DeviceRegistry::new()),
            nets: Mutex::new(BTreeMap::new()),
            next_net: AtomicU64::new(1),
            config,
            registries,
            notifier,
            executor,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run one executor pass on the calling thread (manual cores only).
    pub fn step(&self) -> PassReport {
        self.executor.step()
    }

    // --- loading ---

    /// Load a fragment into a new `READY` net.
    ///
    /// The net gets a unique name and is recorded for lookup; it is not
    /// started. Fails without leaving anything behind when a device the
    /// graph uses is unavailable or lacks the interface, or when the graph
    /// cannot be attached.
    pub fn load(&self, fragment: Fragment, description: &str, realtime: bool) -> AppResult<NetHandle> {
        self.load_with_cycle_time(fragment, description, realtime, self.config.default_cycle_time())
    }

    /// Build a description through the primitive registry and load it.
    pub fn load_description(
        &self,
        description: &FragmentDescription,
        realtime: bool,
    ) -> AppResult<NetHandle> {
        let fragment = description.build(&self.registries.primitives)?;
        let cycle_time = description
            .cycle_time_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_cycle_time());
        let text = if description.description.is_empty() {
            description.name.as_str()
        } else {
            description.description.as_str()
        };
        self.load_with_cycle_time(fragment, text, realtime, cycle_time)
    }

    fn load_with_cycle_time(
        &self,
        fragment: Fragment,
        description: &str,
        realtime: bool,
        cycle_time: Duration,
    ) -> AppResult<NetHandle> {
        self.check_devices(&fragment)?;
        let name = self.next_name("");
        let config = NetConfig::new(name.clone(), cycle_time)
            .with_description(description)
            .with_realtime(realtime);
        let handle = Net::load(fragment, Arc::clone(&self.devices), config, self.notifier.clone())?;
        self.nets.lock().insert(name.clone(), handle.clone());
        tracing::info!(net = %name, %description, realtime, "net loaded");
        Ok(handle)
    }

    fn next_name(&self, infix: &str) -> String {
        let n = self.next_net.fetch_add(1, Ordering::Relaxed);
        format!("{}-{infix}{n}", self.config.net_name_prefix)
    }

    /// Every device the graph uses must exist and offer the interface.
    fn check_devices(&self, fragment: &Fragment) -> AppResult<()> {
        for device_use in fragment.device_uses() {
            if !self.registries.interfaces.contains(&device_use.interface) {
                return Err(AppError::UnknownDeviceInterface(device_use.interface));
            }
            let device = self.devices.get(&device_use.device).map_err(|_| {
                AppError::DeviceUnavailable {
                    device: device_use.device.clone(),
                }
            })?;
            if !device
                .interfaces()
                .iter()
                .any(|offered| *offered == device_use.interface)
            {
                return Err(AppError::MissingDeviceInterface {
                    device: device_use.device,
                    interface: device_use.interface,
                });
            }
        }
        Ok(())
    }

    /// Release a net that is not active and forget it.
    pub fn unload(&self, net: &NetHandle) -> AppResult<()> {
        if !net.unload() {
            return Err(AppError::NetActive(net.name().to_string()));
        }
        self.nets.lock().remove(net.name());
        tracing::info!(net = %net.name(), "net unloaded");
        Ok(())
    }

    pub fn net(&self, name: &str) -> AppResult<NetHandle> {
        self.nets
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownNet(name.to_string()))
    }

    /// Loaded nets, by name.
    pub fn nets(&self) -> Vec<NetHandle> {
        self.nets.lock().values().cloned().collect()
    }

    // --- scheduling ---

    /// Start nets now. Returns `false`, starting nothing, when a net is not
    /// `READY` or an actuator is already driven by an active net.
    pub fn start(&self, nets: &[NetHandle]) -> AppResult<bool> {
        Ok(self.executor.start(nets)?)
    }

    /// Like [`start`](Self::start), but a refused start is an error.
    pub fn try_start(&self, nets: &[NetHandle]) -> AppResult<()> {
        if self.start(nets)? {
            return Ok(());
        }
        let names: Vec<&str> = nets.iter().map(NetHandle::name).collect();
        Err(AppError::StartRefused(names.join(", ")))
    }

    /// Once every `(net, key)` result reads true, kill `kill`, cancel
    /// `cancel` and start `start`. With no results the rule fires on the
    /// next pass.
    pub fn schedule(
        &self,
        results: &[(NetHandle, String)],
        kill: &[NetHandle],
        cancel: &[NetHandle],
        start: &[NetHandle],
    ) -> AppResult<RuleHandle> {
        let condition = if results.is_empty() {
            Condition::True
        } else {
            Condition::all(
                results
                    .iter()
                    .map(|(net, key)| Condition::net_result(net, key.clone())),
            )
        };
        let rule = SchedulingRule::when(condition)
            .kill(kill)
            .cancel(cancel)
            .start(start);
        self.schedule_rule(rule)
    }

    /// [`schedule`](Self::schedule) with a status listener, invoked on the
    /// notification queue for the current status and every transition.
    pub fn schedule_with_listener(
        &self,
        results: &[(NetHandle, String)],
        kill: &[NetHandle],
        cancel: &[NetHandle],
        start: &[NetHandle],
        listener: impl Fn(RuleStatus) + Send + Sync + 'static,
    ) -> AppResult<RuleHandle> {
        let handle = self.schedule(results, kill, cancel, start)?;
        handle.listen(listener);
        Ok(handle)
    }

    /// Kill `predecessor` and start `successor` where it stops driving its
    /// actuators.
    ///
    /// If the two conflict only with each other the successor is chained
    /// and started in the pass the killed predecessor is dropped; otherwise
    /// it starts right away.
    pub fn schedule_after(
        &self,
        predecessor: &NetHandle,
        successor: &NetHandle,
    ) -> AppResult<RuleHandle> {
        self.schedule_rule(
            SchedulingRule::now()
                .kill(std::slice::from_ref(predecessor))
                .start(std::slice::from_ref(successor))
                .after(predecessor),
        )
    }

    pub fn schedule_rule(&self, rule: SchedulingRule) -> AppResult<RuleHandle> {
        Ok(self.executor.schedule(rule)?)
    }

    pub fn cancel(&self, net: &NetHandle) -> bool {
        net.cancel()
    }

    pub fn kill(&self, net: &NetHandle) -> bool {
        net.kill()
    }

    // --- evaluation ---

    /// Run one non-realtime cycle of `fragment` on the calling thread and
    /// return its written outputs in text form.
    pub fn eval(&self, fragment: Fragment) -> AppResult<BTreeMap<String, String>> {
        self.check_devices(&fragment)?;
        let config = NetConfig::new(self.next_name("eval-"), self.config.default_cycle_time())
            .with_description("eval")
            .with_realtime(false);
        let handle = Net::load(fragment, Arc::clone(&self.devices), config, self.notifier.clone())?;
        let mut active = handle.activate()?;
        match active.run_cycle_guarded() {
            Ok(_) => {
                let outputs = active.outputs();
                active.terminate(Termination::Completed);
                Ok(outputs)
            }
            Err(err) => {
                active.terminate(Termination::Failed(err.to_string()));
                Err(err.into())
            }
        }
    }

    pub fn eval_description(
        &self,
        description: &FragmentDescription,
    ) -> AppResult<BTreeMap<String, String>> {
        self.eval(description.build(&self.registries.primitives)?)
    }

    // --- devices ---

    /// Create a device through the factory registry and add it.
    pub fn add_device(
        &self,
        name: &str,
        device_type: &str,
        params: &BTreeMap<String, String>,
    ) -> AppResult<()> {
        let device = self.registries.devices.create(device_type, params)?;
        self.attach_device(name, device, params.clone())
    }

    /// Add an already constructed device.
    pub fn attach_device(
        &self,
        name: &str,
        device: Arc<dyn Device>,
        params: BTreeMap<String, String>,
    ) -> AppResult<()> {
        let device_type = device.device_type().to_string();
        let status = device.status();
        self.devices.insert(name, device)?;
        self.directory.added(name, &device_type, params);
        self.directory.status_changed(name, Some(status));
        tracing::info!(device = %name, %device_type, "device added");
        Ok(())
    }

    /// Add every device a scenario declares, then load its fragment.
    pub fn load_scenario(&self, scenario: &Scenario, realtime: bool) -> AppResult<NetHandle> {
        for device in &scenario.devices {
            self.add_device(&device.name, &device.device_type, &device.text_parameters())?;
        }
        self.load_description(&scenario.fragment, realtime)
    }

    pub fn remove_device(&self, name: &str) -> AppResult<()> {
        if self.devices.remove(name).is_none() {
            return Err(CoreError::DeviceNotFound {
                name: name.to_string(),
            }
            .into());
        }
        if self.executor.active().iter().any(|net| {
            net.sensors().contains(name) || net.actuators().contains(name)
        }) {
            tracing::warn!(device = %name, "removed device is used by an active net");
        }
        self.directory.removed(name);
        tracing::info!(device = %name, "device removed");
        Ok(())
    }

    /// Report a device status change to the device listeners.
    pub fn device_status_changed(&self, name: &str, status: Option<DeviceStatus>) -> bool {
        self.directory.status_changed(name, status)
    }

    /// Register a device listener; known devices are replayed to it.
    pub fn add_device_listener(&self, listener: Arc<dyn DeviceListener>) {
        self.directory.add_listener(listener);
    }

    /// Stop every net and the executor loop.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}

impl std::fmt::Debug for ControlCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCore")
            .field("config", &self.config)
            .field("devices", &self.devices)
            .field("nets", &self.nets.lock().keys().collect::<Vec<_>>())
            .field("executor", &self.executor)
            .finish()
    }
}
