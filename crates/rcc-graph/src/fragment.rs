//! Composite primitives.
//!
//! A fragment owns an ordered list of child primitives. The evaluation order
//! is resolved once, when the fragment is attached to a net, and is then
//! used for all four per-cycle phases.
//!
//! Every fragment carries three reserved ports:
//! - `inActive` (bool in-port): when it reads `false`, the update and write
//!   phases of the whole subtree are skipped for that cycle
//! - `outCompleted` (bool in-port): the completion signal of a root fragment
//! - `outCancel` (bool out-port): set by the net while a cancel is pending

use std::collections::BTreeSet;

use rcc_core::{DeviceUse, PortValue, PrimitiveId};

use crate::context::CycleContext;
use crate::error::{GraphError, GraphResult, PrimitiveError, PrimitiveResult};
use crate::port::{InPort, OutPort};
use crate::primitive::{NetBinding, Primitive, PrimitiveCore};
use crate::sort::sort_children;

pub const IN_ACTIVE: &str = "inActive";
pub const OUT_COMPLETED: &str = "outCompleted";
pub const OUT_CANCEL: &str = "outCancel";

pub struct Fragment {
    core: PrimitiveCore,
    children: Vec<Box<dyn Primitive>>,
    sorted: Option<Vec<usize>>,
    in_active: InPort<bool>,
    completed: InPort<bool>,
    cancel: OutPort<bool>,
}

impl Fragment {
    pub fn new(name: impl Into<String>) -> Self {
        let mut core = PrimitiveCore::new("Fragment", name);
        let in_active = core.reserved_in_port(IN_ACTIVE);
        let completed = core.reserved_in_port(OUT_COMPLETED);
        let cancel = core.reserved_out_port(OUT_CANCEL);
        Self {
            core,
            children: Vec::new(),
            sorted: None,
            in_active,
            completed,
            cancel,
        }
    }

    /// Register a child. Ordering happens when the fragment joins a net.
    pub fn add<P: Primitive + 'static>(&mut self, child: P) -> PrimitiveId {
        self.add_boxed(Box::new(child))
    }

    pub fn add_boxed(&mut self, child: Box<dyn Primitive>) -> PrimitiveId {
        let id = child.id();
        self.children.push(child);
        id
    }

    /// Children in insertion order.
    pub fn children(&self) -> impl Iterator<Item = &dyn Primitive> {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn child(&self, id: PrimitiveId) -> Option<&dyn Primitive> {
        self.children
            .iter()
            .find(|c| c.id() == id)
            .map(|c| c.as_ref())
    }

    pub fn child_by_name(&self, name: &str) -> GraphResult<&dyn Primitive> {
        self.children
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
            .ok_or_else(|| GraphError::UnknownChild {
                fragment: self.core.name().to_string(),
                child: name.to_string(),
            })
    }

    /// Evaluation order, available once attached.
    pub fn sorted_children(&self) -> Option<Vec<PrimitiveId>> {
        self.sorted
            .as_ref()
            .map(|order| order.iter().map(|&i| self.children[i].id()).collect())
    }

    /// Expose an input across the fragment boundary.
    ///
    /// Returns the outer in-port (wired by whoever embeds the fragment) and
    /// the inner out-port children read from. The outer port must not be
    /// read directly.
    pub fn expose_input<T: PortValue>(&mut self, name: &str) -> GraphResult<(InPort<T>, OutPort<T>)> {
        let outer = InPort::new_boundary(self.core.id(), name);
        self.core.insert_in_port(outer.clone())?;
        let inner = OutPort::boundary(self.core.id(), name, &outer);
        Ok((outer, inner))
    }

    /// Expose a child's output across the fragment boundary.
    pub fn expose_output<T: PortValue>(&mut self, name: &str, inner: &OutPort<T>) -> GraphResult<OutPort<T>> {
        let outer = OutPort::forwarding(self.core.id(), name, inner);
        self.core.insert_out_port(outer.clone())?;
        Ok(outer)
    }

    /// Expose the out-port `port` of the child named `child` under `name`,
    /// without knowing its value type.
    pub fn expose_child_output(&mut self, name: &str, child: &str, port: &str) -> GraphResult<()> {
        let forwarded = self
            .child_by_name(child)?
            .core()
            .output(port)?
            .forwarded(self.core.id(), name);
        self.core.insert_boxed_out_port(forwarded)
    }

    /// The `inActive` gate.
    pub fn in_active(&self) -> InPort<bool> {
        self.in_active.clone()
    }

    /// The `outCompleted` signal of a root fragment.
    pub fn completion(&self) -> InPort<bool> {
        self.completed.clone()
    }

    /// The `outCancel` flag children may watch to wind down.
    pub fn cancel_signal(&self) -> OutPort<bool> {
        self.cancel.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get() == Some(true)
    }

    pub fn set_cancel_flag(&self, cancelled: bool) {
        self.cancel.set(cancelled);
    }

    /// Whether the subtree runs its update and write phases this cycle.
    ///
    /// An unconnected or unwritten `inActive` counts as active.
    pub fn is_active(&self) -> bool {
        self.in_active.get().unwrap_or(true)
    }

    /// Reject boundary ports whose forwarding chain leads back to itself.
    fn check_forwarding(&self) -> GraphResult<()> {
        let looping = self
            .core
            .outputs()
            .find(|port| port.forms_loop())
            .map(|port| port.name().to_string())
            .or_else(|| {
                self.core
                    .inputs()
                    .find(|port| port.source_forms_loop())
                    .map(|port| port.name().to_string())
            });
        match looping {
            Some(port) => Err(GraphError::ForwardingLoop {
                fragment: self.core.name().to_string(),
                port,
            }),
            None => Ok(()),
        }
    }

    fn run_phase(&mut self, ctx: &mut CycleContext<'_>, phase: Phase) -> PrimitiveResult<()> {
        let Self {
            core,
            children,
            sorted,
            ..
        } = self;
        let order = sorted.as_deref().ok_or_else(|| PrimitiveError::NotAttached {
            primitive: core.name().to_string(),
        })?;
        for &idx in order {
            let child = children[idx].as_mut();
            match phase {
                Phase::ReadSensor => child.read_sensor(ctx)?,
                Phase::UpdateData => child.update_data(ctx)?,
                Phase::WriteActuator => child.write_actuator(ctx)?,
                Phase::UpdateNetcomm => child.update_netcomm(ctx)?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Phase {
    ReadSensor,
    UpdateData,
    WriteActuator,
    UpdateNetcomm,
}

impl Primitive for Fragment {
    fn core(&self) -> &PrimitiveCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PrimitiveCore {
        &mut self.core
    }

    fn set_net(&mut self, binding: &NetBinding) -> GraphResult<()> {
        self.check_forwarding()?;
        let order = sort_children(self.core.name(), &self.children)?;
        self.core.attach(binding)?;
        for idx in 0..self.children.len() {
            if let Err(err) = self.children[idx].set_net(binding) {
                for child in &mut self.children[..idx] {
                    child.cleanup();
                }
                self.core.detach();
                return Err(err);
            }
        }
        self.sorted = Some(order);
        Ok(())
    }

    fn cleanup(&mut self) {
        for child in &mut self.children {
            child.cleanup();
        }
        self.core.detach();
        self.sorted = None;
    }

    fn read_sensor(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.run_phase(ctx, Phase::ReadSensor)
    }

    fn update_data(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.run_phase(ctx, Phase::UpdateData)
    }

    fn write_actuator(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.run_phase(ctx, Phase::WriteActuator)
    }

    fn update_netcomm(&mut self, ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.run_phase(ctx, Phase::UpdateNetcomm)
    }

    fn referenced_primitives(&self) -> BTreeSet<PrimitiveId> {
        let inside = self.descendant_ids();
        let mut refs = self.core.referenced_primitives();
        for child in &self.children {
            refs.extend(child.referenced_primitives());
        }
        refs.retain(|id| !inside.contains(id));
        refs
    }

    fn descendant_ids(&self) -> BTreeSet<PrimitiveId> {
        let mut ids = BTreeSet::from([self.core.id()]);
        for child in &self.children {
            ids.extend(child.descendant_ids());
        }
        ids
    }

    fn device_uses(&self) -> Vec<DeviceUse> {
        let mut uses: BTreeSet<DeviceUse> = self.core.device_uses().iter().cloned().collect();
        for child in &self.children {
            uses.extend(child.device_uses());
        }
        uses.into_iter().collect()
    }
}

impl std::fmt::Debug for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragment")
            .field("name", &self.core.name())
            .field("children", &self.children.len())
            .field("sorted", &self.sorted)
            .finish()
    }
}
