//! Net lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a net.
///
/// `READY -> RUNNING -> (CANCELLING) -> TERMINATED`. A net that is cancelled
/// or killed before it starts goes straight from `READY` to `TERMINATED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetStatus {
    Ready,
    Running,
    Cancelling,
    Terminated,
}

impl NetStatus {
    /// Whether the net is being cycled by an executor.
    pub fn is_active(self) -> bool {
        matches!(self, NetStatus::Running | NetStatus::Cancelling)
    }

    pub fn is_terminal(self) -> bool {
        self == NetStatus::Terminated
    }
}

impl fmt::Display for NetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetStatus::Ready => "READY",
            NetStatus::Running => "RUNNING",
            NetStatus::Cancelling => "CANCELLING",
            NetStatus::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}
