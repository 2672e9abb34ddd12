//! rcc-sched: condition-gated scheduling and the real-time executor.
//!
//! Contains:
//! - condition (three-valued expressions over netcomm values and net status)
//! - rule (scheduling rules and their listenable status)
//! - pacing (wall-clock pacing with one-shot lag warnings)
//! - executor (the single loop that cycles nets and fires rules)

pub mod condition;
pub mod error;
pub mod executor;
pub mod pacing;
pub mod rule;

pub use condition::{Condition, Truth};
pub use error::{SchedError, SchedResult};
pub use executor::{Executor, ExecutorConfig, PassReport};
pub use pacing::{PaceDecision, Pacer, TimingWarning};
pub use rule::{RuleHandle, RuleStatus, SchedulingRule};
