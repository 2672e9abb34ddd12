//! Scheduling errors.

use rcc_core::CoreError;
use rcc_net::NetError;
use thiserror::Error;

pub type SchedResult<T> = Result<T, SchedError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Net(#[from] NetError),

    /// The executor has been shut down.
    #[error("Executor is shut down")]
    ShutDown,
}
