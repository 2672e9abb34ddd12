//! Typed ports.
//!
//! An [`OutPort`] holds the last value written by its owning primitive and
//! the cycle it was written in. An [`InPort`] refers to at most one out-port
//! of the same value type; reading an unconnected in-port yields `None`.
//!
//! Port handles are cheap shallow clones: a clone refers to the same port,
//! so a primitive can hand out handles for wiring while keeping its own.
//!
//! Fragment boundaries are crossed through forwarding out-ports, which
//! delegate reads (value and write-cycle stamp) to another port, so
//! consumers cannot tell a boundary port from the port behind it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rcc_core::{PortValue, PrimitiveId};

use crate::error::{GraphError, GraphResult};

/// Cycle counter of the net a port is attached to.
#[derive(Debug, Clone, Default)]
pub struct CycleClock(Arc<AtomicU64>);

impl CycleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cycle number (0 before the first cycle).
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Start the next cycle and return its number.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// A value together with the cycle it was written in.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<T> {
    pub value: T,
    pub cycle: u64,
}

enum Source<T: PortValue> {
    /// Written by the owning primitive.
    Local(Option<Sample<T>>),
    /// Delegates to an inner port (fragment output).
    Forward(OutPort<T>),
    /// Delegates to whatever feeds a fragment input.
    Boundary(InPort<T>),
}

struct OutShared<T: PortValue> {
    owner: PrimitiveId,
    name: String,
    source: Mutex<Source<T>>,
    clock: Mutex<Option<CycleClock>>,
}

/// Output endpoint of a primitive.
pub struct OutPort<T: PortValue> {
    shared: Arc<OutShared<T>>,
}

impl<T: PortValue> Clone for OutPort<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: PortValue> OutPort<T> {
    fn with_source(owner: PrimitiveId, name: &str, source: Source<T>) -> Self {
        Self {
            shared: Arc::new(OutShared {
                owner,
                name: name.to_string(),
                source: Mutex::new(source),
                clock: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn new(owner: PrimitiveId, name: &str) -> Self {
        Self::with_source(owner, name, Source::Local(None))
    }

    pub(crate) fn forwarding(owner: PrimitiveId, name: &str, inner: &OutPort<T>) -> Self {
        Self::with_source(owner, name, Source::Forward(inner.clone()))
    }

    pub(crate) fn boundary(owner: PrimitiveId, name: &str, outer: &InPort<T>) -> Self {
        Self::with_source(owner, name, Source::Boundary(outer.clone()))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The primitive owning this port.
    pub fn owner(&self) -> PrimitiveId {
        self.shared.owner
    }

    /// Whether two handles refer to the same port.
    pub fn same_port(&self, other: &OutPort<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Store a value, stamped with the owning net's current cycle.
    ///
    /// # Panics
    ///
    /// Panics if this is a forwarding port of a fragment boundary; those
    /// only mirror the port behind them.
    pub fn set(&self, value: T) {
        let cycle = self.shared.clock.lock().as_ref().map_or(0, CycleClock::now);
        let mut source = self.shared.source.lock();
        match &mut *source {
            Source::Local(slot) => *slot = Some(Sample { value, cycle }),
            Source::Forward(_) | Source::Boundary(_) => {
                panic!("cannot write forwarding port '{}'", self.shared.name)
            }
        }
    }

    /// Forget the stored value.
    pub fn clear(&self) {
        if let Source::Local(slot) = &mut *self.shared.source.lock() {
            *slot = None;
        }
    }

    /// Last written value with its write-cycle stamp.
    ///
    /// A chain of forwarding ports that leads back to itself reads as
    /// `None`; attaching such a fragment fails with `ForwardingLoop`.
    pub fn sample(&self) -> Option<Sample<T>> {
        match self.resolve() {
            Resolved::Sample(sample) => sample,
            Resolved::Loop => None,
        }
    }

    /// Whether following the forwarding chain revisits a port.
    pub fn forms_loop(&self) -> bool {
        matches!(self.resolve(), Resolved::Loop)
    }

    fn resolve(&self) -> Resolved<T> {
        let mut visited: Vec<*const OutShared<T>> = Vec::new();
        let mut current = self.clone();
        loop {
            let ptr = Arc::as_ptr(&current.shared);
            if visited.contains(&ptr) {
                return Resolved::Loop;
            }
            visited.push(ptr);
            let next = {
                let source = current.shared.source.lock();
                match &*source {
                    Source::Local(slot) => return Resolved::Sample(slot.clone()),
                    Source::Forward(inner) => inner.clone(),
                    Source::Boundary(outer) => match outer.shared.source.lock().clone() {
                        Some(port) => port,
                        None => return Resolved::Sample(None),
                    },
                }
            };
            current = next;
        }
    }

    pub fn get(&self) -> Option<T> {
        self.sample().map(|s| s.value)
    }

    pub fn write_cycle(&self) -> Option<u64> {
        self.sample().map(|s| s.cycle)
    }

    pub(crate) fn bind_clock(&self, clock: Option<&CycleClock>) {
        *self.shared.clock.lock() = clock.cloned();
    }
}

enum Resolved<T> {
    Sample(Option<Sample<T>>),
    Loop,
}

impl<T: PortValue> fmt::Debug for OutPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutPort")
            .field("name", &self.shared.name)
            .field("owner", &self.shared.owner)
            .field("sample", &self.sample())
            .finish()
    }
}

struct InShared<T: PortValue> {
    owner: PrimitiveId,
    name: String,
    boundary: bool,
    source: Mutex<Option<OutPort<T>>>,
}

/// Input endpoint of a primitive.
pub struct InPort<T: PortValue> {
    shared: Arc<InShared<T>>,
}

impl<T: PortValue> Clone for InPort<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: PortValue> InPort<T> {
    pub(crate) fn new(owner: PrimitiveId, name: &str) -> Self {
        Self::create(owner, name, false)
    }

    pub(crate) fn new_boundary(owner: PrimitiveId, name: &str) -> Self {
        Self::create(owner, name, true)
    }

    fn create(owner: PrimitiveId, name: &str, boundary: bool) -> Self {
        Self {
            shared: Arc::new(InShared {
                owner,
                name: name.to_string(),
                boundary,
                source: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn owner(&self) -> PrimitiveId {
        self.shared.owner
    }

    /// Whether this is the outer side of a fragment boundary.
    pub fn is_boundary(&self) -> bool {
        self.shared.boundary
    }

    /// Connect to `source`, replacing any previous connection.
    ///
    /// Passing `None` disconnects. Connecting twice to the same port is a no-op.
    pub fn connect_to(&self, source: Option<&OutPort<T>>) {
        *self.shared.source.lock() = source.cloned();
    }

    pub fn disconnect(&self) {
        self.connect_to(None);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.source.lock().is_some()
    }

    /// Owner of the connected out-port, if any.
    pub fn source_owner(&self) -> Option<PrimitiveId> {
        self.shared.source.lock().as_ref().map(OutPort::owner)
    }

    /// Current value of the connected out-port with its write-cycle stamp.
    ///
    /// # Panics
    ///
    /// Panics when called on a fragment boundary in-port; read the paired
    /// inner out-port returned by `Fragment::expose_input` instead.
    pub fn sample(&self) -> Option<Sample<T>> {
        assert!(
            !self.shared.boundary,
            "fragment boundary port '{}' must be read through its paired out-port",
            self.shared.name
        );
        self.source_sample()
    }

    pub fn get(&self) -> Option<T> {
        self.sample().map(|s| s.value)
    }

    fn source_sample(&self) -> Option<Sample<T>> {
        let source = self.shared.source.lock().clone();
        source.and_then(|port| port.sample())
    }

    /// Whether the connected out-port forwards in a loop.
    pub fn source_forms_loop(&self) -> bool {
        let source = self.shared.source.lock().clone();
        source.is_some_and(|port| port.forms_loop())
    }
}

impl<T: PortValue> fmt::Debug for InPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InPort")
            .field("name", &self.shared.name)
            .field("owner", &self.shared.owner)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Type-erased view of an in-port, used for wiring by name.
pub trait AnyInPort: Send + Sync {
    fn name(&self) -> &str;
    fn value_type(&self) -> &'static str;
    fn source_owner(&self) -> Option<PrimitiveId>;
    /// Connect to an out-port of the same value type.
    fn connect_any(&self, source: &dyn AnyOutPort) -> GraphResult<()>;
    fn source_forms_loop(&self) -> bool;
    fn disconnect(&self);
    fn as_any(&self) -> &dyn Any;
}

/// Type-erased view of an out-port.
pub trait AnyOutPort: Send + Sync {
    fn name(&self) -> &str;
    fn value_type(&self) -> &'static str;
    fn owner(&self) -> PrimitiveId;
    /// Current value in canonical text form.
    fn render(&self) -> Option<String>;
    fn write_cycle(&self) -> Option<u64>;
    fn bind_clock(&self, clock: Option<&CycleClock>);
    /// A forwarding port owned by `owner` that mirrors this one.
    fn forwarded(&self, owner: PrimitiveId, name: &str) -> Box<dyn AnyOutPort>;
    fn forms_loop(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: PortValue> AnyInPort for InPort<T> {
    fn name(&self) -> &str {
        InPort::name(self)
    }

    fn value_type(&self) -> &'static str {
        T::type_name()
    }

    fn source_owner(&self) -> Option<PrimitiveId> {
        InPort::source_owner(self)
    }

    fn connect_any(&self, source: &dyn AnyOutPort) -> GraphResult<()> {
        let typed = source
            .as_any()
            .downcast_ref::<OutPort<T>>()
            .ok_or_else(|| GraphError::PortTypeMismatch {
                port: self.shared.name.clone(),
                expected: T::type_name(),
                found: source.value_type(),
            })?;
        self.connect_to(Some(typed));
        Ok(())
    }

    fn source_forms_loop(&self) -> bool {
        InPort::source_forms_loop(self)
    }

    fn disconnect(&self) {
        InPort::disconnect(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: PortValue> AnyOutPort for OutPort<T> {
    fn name(&self) -> &str {
        OutPort::name(self)
    }

    fn value_type(&self) -> &'static str {
        T::type_name()
    }

    fn owner(&self) -> PrimitiveId {
        OutPort::owner(self)
    }

    fn render(&self) -> Option<String> {
        self.get().map(|v| v.render())
    }

    fn write_cycle(&self) -> Option<u64> {
        OutPort::write_cycle(self)
    }

    fn bind_clock(&self, clock: Option<&CycleClock>) {
        OutPort::bind_clock(self, clock)
    }

    fn forwarded(&self, owner: PrimitiveId, name: &str) -> Box<dyn AnyOutPort> {
        Box::new(OutPort::forwarding(owner, name, self))
    }

    fn forms_loop(&self) -> bool {
        OutPort::forms_loop(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
