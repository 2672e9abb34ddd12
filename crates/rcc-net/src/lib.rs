//! rcc-net: nets and their cyclic execution.
//!
//! A net is one loaded instance of a fragment graph bound to a device
//! registry. Each cycle runs four phases in a fixed order (read sensors,
//! update data, write actuators, publish netcomm values) and a lifecycle
//! state machine reports `READY`, `RUNNING`, `CANCELLING` and `TERMINATED`
//! to listeners.

pub mod error;
pub mod net;
pub mod netcomm;
pub mod status;

pub use error::{NetError, NetResult};
pub use net::{ActiveNet, CycleOutcome, Net, NetConfig, NetHandle, Termination};
pub use netcomm::{NetcommListener, NetcommUpdate, NetcommValue};
pub use status::NetStatus;
