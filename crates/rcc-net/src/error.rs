//! Net loading and execution errors.

use rcc_core::CoreError;
use rcc_graph::{GraphError, PrimitiveError};
use thiserror::Error;

use crate::status::NetStatus;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A primitive callback returned an error during a cycle.
    #[error("Net '{net}' failed in cycle {cycle}: {source}")]
    CycleFailed {
        net: String,
        cycle: u64,
        #[source]
        source: PrimitiveError,
    },

    /// A primitive callback panicked during a cycle.
    #[error("Net '{net}' panicked in cycle {cycle}: {what}")]
    Panicked { net: String, cycle: u64, what: String },

    /// The net cannot be activated from its current state.
    #[error("Net '{net}' is {status}, expected READY")]
    NotReady { net: String, status: NetStatus },
}
