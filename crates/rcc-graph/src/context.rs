//! Per-cycle execution context handed to primitive callbacks.

use std::collections::BTreeMap;

use rcc_core::DeviceRegistry;

/// What a primitive can see and touch during one cycle.
pub struct CycleContext<'a> {
    cycle: u64,
    net: &'a str,
    realtime: bool,
    devices: &'a DeviceRegistry,
    netcomm_in: &'a BTreeMap<String, String>,
    netcomm_out: &'a mut BTreeMap<String, String>,
}

impl<'a> CycleContext<'a> {
    pub fn new(
        cycle: u64,
        net: &'a str,
        realtime: bool,
        devices: &'a DeviceRegistry,
        netcomm_in: &'a BTreeMap<String, String>,
        netcomm_out: &'a mut BTreeMap<String, String>,
    ) -> Self {
        Self {
            cycle,
            net,
            realtime,
            devices,
            netcomm_in,
            netcomm_out,
        }
    }

    /// Number of the cycle being executed.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Name of the net being executed.
    pub fn net_name(&self) -> &str {
        self.net
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    pub fn devices(&self) -> &DeviceRegistry {
        self.devices
    }

    /// Value written into the net from outside, if any.
    pub fn netcomm_in(&self, key: &str) -> Option<&str> {
        self.netcomm_in.get(key).map(String::as_str)
    }

    /// Export a named value for external observation this cycle.
    pub fn publish(&mut self, key: impl Into<String>, value: String) {
        self.netcomm_out.insert(key.into(), value);
    }
}
