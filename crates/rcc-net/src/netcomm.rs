//! Named values exchanged between a net and the outside world.
//!
//! Values travel as canonical text (see `PortValue::render`): primitives
//! publish them during the netcomm phase, applications write inbound values
//! that `NetcommIn` primitives pick up at the next read phase.

use std::collections::BTreeMap;
use std::sync::Arc;

use rcc_core::Notifier;

/// Latest published value of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetcommValue {
    pub value: String,
    /// Cycle the value was published in.
    pub cycle: u64,
}

/// Batch of values published by one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetcommUpdate {
    pub net: String,
    pub cycle: u64,
    pub values: BTreeMap<String, String>,
}

pub type NetcommListener = Arc<dyn Fn(&NetcommUpdate) + Send + Sync>;

#[derive(Default)]
pub(crate) struct NetcommTable {
    outgoing: BTreeMap<String, NetcommValue>,
    incoming: BTreeMap<String, String>,
    listeners: Vec<NetcommListener>,
}

impl NetcommTable {
    pub(crate) fn get(&self, key: &str) -> Option<&NetcommValue> {
        self.outgoing.get(key)
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, String> {
        self.outgoing
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    pub(crate) fn incoming(&self) -> BTreeMap<String, String> {
        self.incoming.clone()
    }

    pub(crate) fn write_incoming(&mut self, key: String, value: String) {
        self.incoming.insert(key, value);
    }

    pub(crate) fn add_listener(&mut self, listener: NetcommListener) {
        self.listeners.push(listener);
    }

    /// Store a cycle's values and queue listener delivery on `notifier`.
    pub(crate) fn publish(
        &mut self,
        net: &str,
        cycle: u64,
        values: BTreeMap<String, String>,
        notifier: &Notifier,
    ) {
        if values.is_empty() {
            return;
        }
        for (key, value) in &values {
            self.outgoing.insert(
                key.clone(),
                NetcommValue {
                    value: value.clone(),
                    cycle,
                },
            );
        }
        if self.listeners.is_empty() {
            return;
        }
        let listeners = self.listeners.clone();
        let update = NetcommUpdate {
            net: net.to_string(),
            cycle,
            values,
        };
        notifier.post(move || {
            for listener in &listeners {
                listener(&update);
            }
        });
    }
}
