//! Scheduling rules: condition-gated batches of start/cancel/kill actions.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use rcc_core::{Notifier, RuleId, StatusCell};
use rcc_net::NetHandle;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Lifecycle of a scheduling rule. Every status but `ACTIVE` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    /// Waiting for the condition to become true.
    Active,
    /// Condition became true and the actions were applied.
    Fired,
    /// Condition became true but the actions could not be applied.
    #[serde(rename = "FIREFAILED")]
    FireFailed,
    /// Withdrawn before firing.
    Inactive,
}

impl RuleStatus {
    pub fn is_terminal(self) -> bool {
        self != RuleStatus::Active
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleStatus::Active => "ACTIVE",
            RuleStatus::Fired => "FIRED",
            RuleStatus::FireFailed => "FIREFAILED",
            RuleStatus::Inactive => "INACTIVE",
        };
        f.write_str(s)
    }
}

/// What to do, and when.
///
/// When the condition is true the executor kills, then cancels, then starts
/// the listed nets, or does nothing at all if a start would violate actuator
/// exclusivity.
#[derive(Debug, Clone)]
pub struct SchedulingRule {
    pub(crate) condition: Condition,
    pub(crate) start: Vec<NetHandle>,
    pub(crate) cancel: Vec<NetHandle>,
    pub(crate) kill: Vec<NetHandle>,
    pub(crate) after: Option<NetHandle>,
}

impl SchedulingRule {
    pub fn when(condition: Condition) -> Self {
        Self {
            condition,
            start: Vec::new(),
            cancel: Vec::new(),
            kill: Vec::new(),
            after: None,
        }
    }

    /// Fire on the next scheduling pass.
    pub fn now() -> Self {
        Self::when(Condition::True)
    }

    pub fn start(mut self, nets: &[NetHandle]) -> Self {
        self.start.extend(nets.iter().cloned());
        self
    }

    pub fn cancel(mut self, nets: &[NetHandle]) -> Self {
        self.cancel.extend(nets.iter().cloned());
        self
    }

    pub fn kill(mut self, nets: &[NetHandle]) -> Self {
        self.kill.extend(nets.iter().cloned());
        self
    }

    /// Let a start that conflicts only with `predecessor` wait for it to
    /// terminate instead of failing. Combined with a kill of the same net
    /// this is a hand-over: the start is admitted in the pass where the
    /// predecessor stops.
    pub fn after(mut self, predecessor: &NetHandle) -> Self {
        self.after = Some(predecessor.clone());
        self
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }
}

struct RuleShared {
    id: RuleId,
    status: StatusCell<RuleStatus>,
    notifier: Notifier,
}

/// Listenable status of a registered rule.
#[derive(Clone)]
pub struct RuleHandle {
    shared: Arc<RuleShared>,
}

impl RuleHandle {
    pub(crate) fn new(notifier: Notifier) -> Self {
        Self {
            shared: Arc::new(RuleShared {
                id: RuleId::next(),
                status: StatusCell::new(RuleStatus::Active),
                notifier,
            }),
        }
    }

    pub fn id(&self) -> RuleId {
        self.shared.id
    }

    pub fn status(&self) -> RuleStatus {
        self.shared.status.get()
    }

    /// Status channel; the current status is delivered first.
    pub fn subscribe(&self) -> Receiver<RuleStatus> {
        self.shared.status.subscribe()
    }

    /// Status callback run on the notification thread; the current status
    /// is delivered first, so late listeners still learn the outcome.
    pub fn listen(&self, callback: impl Fn(RuleStatus) + Send + Sync + 'static) {
        self.shared.status.listen(&self.shared.notifier, callback);
    }

    /// Block until the rule left `ACTIVE` or `timeout` elapsed.
    pub fn wait_settled(&self, timeout: Option<Duration>) -> RuleStatus {
        self.shared.status.wait_until(RuleStatus::is_terminal, timeout)
    }

    /// Withdraw a rule that has not fired yet. Nets it would have scheduled
    /// are left alone.
    pub fn deactivate(&self) -> bool {
        self.settle(RuleStatus::Inactive)
    }

    pub(crate) fn settle(&self, outcome: RuleStatus) -> bool {
        self.shared
            .status
            .transition(|s| (s == RuleStatus::Active).then_some(outcome))
            .is_some()
    }
}

impl fmt::Debug for RuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}
