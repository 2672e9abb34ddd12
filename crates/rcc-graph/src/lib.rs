//! rcc-graph: the primitive/port/fragment graph model.
//!
//! Provides:
//! - Typed ports and parameters with type-erased views for wiring by name
//! - The `Primitive` trait and its shared `PrimitiveCore`
//! - `Fragment` composites with attach-time topological ordering
//! - The per-cycle `CycleContext`
//! - A small library of standard primitives

pub mod context;
pub mod error;
pub mod fragment;
pub mod library;
pub mod parameter;
pub mod port;
pub mod primitive;
mod sort;

pub use context::CycleContext;
pub use error::{GraphError, GraphResult, PrimitiveError, PrimitiveResult};
pub use fragment::{Fragment, IN_ACTIVE, OUT_CANCEL, OUT_COMPLETED};
pub use library::{
    ActuatorWrite, And, Constant, CycleCounter, NetcommIn, NetcommOut, SensorRead, StopAfter,
    Threshold,
};
pub use parameter::{AnyParameter, Parameter};
pub use port::{AnyInPort, AnyOutPort, CycleClock, InPort, OutPort, Sample};
pub use primitive::{NetBinding, Primitive, PrimitiveCore};
