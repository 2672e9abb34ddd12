//! The real-time executor loop.
//!
//! One executor runs per control core. Each pass:
//! 1. takes the nets admitted since the last pass into the running set, then
//!    advances every running net by one cycle (killed nets are dropped
//!    first, without cycling);
//! 2. under the scheduling lock, terminates finished nets, starts the
//!    successors of completed or killed ones and evaluates pending rules;
//! 3. paces itself to the cycle time of the first running net.
//!
//! In threaded mode the loop runs on a dedicated thread that exits when no
//! net is active and is respawned by the next start. In manual mode nothing
//! runs until [`Executor::step`] is called, which makes cycle-exact tests
//! deterministic.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rcc_core::{CoreError, Notifier, RuleId};
use rcc_net::{ActiveNet, CycleOutcome, NetHandle, NetStatus, Termination};

use crate::error::{SchedError, SchedResult};
use crate::pacing::{Pacer, TimingWarning};
use crate::rule::{RuleHandle, RuleStatus, SchedulingRule};

/// Executor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub thread_name: String,
    /// Lag beyond which a realtime loop reports falling behind.
    pub lag_warning: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: "rcc-executor".to_string(),
            lag_warning: Duration::from_millis(500),
        }
    }
}

/// What one loop pass did.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Number of nets advanced by one cycle.
    pub cycled: usize,
    /// Nets admitted during this pass (successors and rule starts).
    pub started: Vec<NetHandle>,
    pub terminated: Vec<NetHandle>,
    pub settled_rules: Vec<(RuleId, RuleStatus)>,
    /// No net is active any more.
    pub idle: bool,
}

struct Registered {
    rule: SchedulingRule,
    handle: RuleHandle,
}

#[derive(Default)]
struct SchedState {
    /// Admitted nets, running or waiting for their first cycle.
    active: Vec<NetHandle>,
    /// Admitted nets the loop has not picked up yet.
    incoming: Vec<ActiveNet>,
    rules: Vec<Registered>,
    thread_running: bool,
    join: Option<JoinHandle<()>>,
    shut_down: bool,
}

/// State owned by whoever runs the loop.
struct LoopState {
    running: Vec<ActiveNet>,
    pacer: Pacer,
}

impl LoopState {
    fn new(lag_warning: Duration) -> Self {
        Self {
            running: Vec::new(),
            pacer: Pacer::new(lag_warning),
        }
    }
}

struct ExecInner {
    config: ExecutorConfig,
    notifier: Notifier,
    state: Mutex<SchedState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Threaded,
    Manual,
}

pub struct Executor {
    inner: Arc<ExecInner>,
    mode: Mode,
    manual: Mutex<LoopState>,
}

impl Executor {
    /// Executor whose loop runs on its own thread.
    pub fn threaded(config: ExecutorConfig, notifier: Notifier) -> Self {
        Self::create(config, notifier, Mode::Threaded)
    }

    /// Executor whose loop only advances through [`step`](Self::step).
    pub fn manual(config: ExecutorConfig, notifier: Notifier) -> Self {
        Self::create(config, notifier, Mode::Manual)
    }

    fn create(config: ExecutorConfig, notifier: Notifier, mode: Mode) -> Self {
        let manual = Mutex::new(LoopState::new(config.lag_warning));
        Self {
            inner: Arc::new(ExecInner {
                config,
                notifier,
                state: Mutex::new(SchedState::default()),
            }),
            mode,
            manual,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.mode == Mode::Manual
    }

    /// Start nets now.
    ///
    /// All-or-nothing: returns `false` without starting anything if a net is
    /// not `READY` or if the nets' actuators overlap with each other or with
    /// an active net. The nets begin cycling on the next loop pass.
    pub fn start(&self, nets: &[NetHandle]) -> SchedResult<bool> {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return Err(SchedError::ShutDown);
        }
        let admitted = admit(&mut state, nets);
        self.inner.apply_rules(&mut state, &mut PassReport::default());
        self.ensure_loop(&mut state)?;
        Ok(admitted)
    }

    /// Register a rule. It is evaluated immediately and then on every pass
    /// until it settles.
    pub fn schedule(&self, rule: SchedulingRule) -> SchedResult<RuleHandle> {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return Err(SchedError::ShutDown);
        }
        let handle = RuleHandle::new(self.inner.notifier.clone());
        tracing::debug!(rule = %handle.id(), condition = ?rule.condition(), "rule scheduled");
        state.rules.push(Registered {
            rule,
            handle: handle.clone(),
        });
        self.inner.apply_rules(&mut state, &mut PassReport::default());
        self.ensure_loop(&mut state)?;
        Ok(handle)
    }

    /// Nets currently admitted.
    pub fn active(&self) -> Vec<NetHandle> {
        self.inner.state.lock().active.clone()
    }

    /// Number of rules still waiting to fire.
    pub fn pending_rules(&self) -> usize {
        self.inner.state.lock().rules.len()
    }

    /// Whether the loop thread is alive.
    pub fn is_looping(&self) -> bool {
        self.inner.state.lock().thread_running
    }

    /// Run exactly one loop pass on the calling thread (manual mode only;
    /// a threaded executor returns an empty report).
    pub fn step(&self) -> PassReport {
        if self.mode != Mode::Manual {
            return PassReport::default();
        }
        let mut loop_state = self.manual.lock();
        self.inner.run_pass(&mut loop_state, false)
    }

    /// Run passes until no net is active or `max_passes` is reached.
    /// Returns the number of passes run (manual mode only).
    pub fn run_until_idle(&self, max_passes: usize) -> usize {
        for pass in 0..max_passes {
            if self.step().idle {
                return pass + 1;
            }
        }
        max_passes
    }

    /// Kill every net, withdraw pending rules and stop the loop thread.
    pub fn shutdown(&self) {
        let join = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            for net in &state.active {
                net.kill();
            }
            for registered in state.rules.drain(..) {
                registered.handle.deactivate();
            }
            state.join.take()
        };
        match self.mode {
            Mode::Threaded => {
                if let Some(join) = join {
                    if join.join().is_err() {
                        tracing::error!("executor thread panicked");
                    }
                }
            }
            Mode::Manual => {
                self.step();
            }
        }
        tracing::debug!("executor shut down");
    }

    fn ensure_loop(&self, state: &mut SchedState) -> SchedResult<()> {
        if self.mode != Mode::Threaded || state.thread_running || state.active.is_empty() {
            return Ok(());
        }
        if let Some(previous) = state.join.take() {
            // The previous loop already left its last critical section.
            let _ = previous.join();
        }
        let inner = Arc::clone(&self.inner);
        let name = self.inner.config.thread_name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || inner.run_loop())
            .map_err(|e| CoreError::Thread {
                name,
                what: e.to_string(),
            })?;
        state.thread_running = true;
        state.join = Some(join);
        Ok(())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Executor")
            .field("mode", &self.mode)
            .field("active", &state.active)
            .field("rules", &state.rules.len())
            .field("thread_running", &state.thread_running)
            .finish()
    }
}

impl ExecInner {
    fn run_loop(&self) {
        tracing::debug!("executor loop started");
        let mut loop_state = LoopState::new(self.config.lag_warning);
        loop {
            let report = self.run_pass(&mut loop_state, true);
            if report.idle {
                break;
            }
            let Some(first) = loop_state.running.first().map(|n| n.handle().clone()) else {
                continue;
            };
            let decision =
                loop_state
                    .pacer
                    .advance(Instant::now(), first.cycle_time(), first.is_realtime());
            match decision.warning {
                Some(TimingWarning::FallingBehind(lag)) => {
                    tracing::warn!(net = %first.name(), ?lag, "cannot hold up with time");
                }
                Some(TimingWarning::CaughtUp) => {
                    tracing::warn!(net = %first.name(), "caught up with time");
                }
                None => {}
            }
            if let Some(sleep) = decision.sleep {
                thread::sleep(sleep);
            }
        }
        tracing::debug!("executor loop idle, exiting");
    }

    fn run_pass(&self, loop_state: &mut LoopState, threaded: bool) -> PassReport {
        let mut report = PassReport::default();

        {
            let mut state = self.state.lock();
            loop_state.running.append(&mut state.incoming);
        }

        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(loop_state.running.len());
        for mut net in loop_state.running.drain(..) {
            if net.handle().kill_requested() {
                finished.push((net, Termination::Killed));
                continue;
            }
            report.cycled += 1;
            match net.run_cycle_guarded() {
                Ok(CycleOutcome::Continue) => still_running.push(net),
                Ok(CycleOutcome::Completed) => finished.push((net, Termination::Completed)),
                Err(err) => {
                    tracing::error!(net = %net.handle().name(), %err, "net terminated by runtime failure");
                    finished.push((net, Termination::Failed(err.to_string())));
                }
            }
        }
        loop_state.running = still_running;

        let mut state = self.state.lock();
        let mut successors = Vec::new();
        for (net, cause) in finished {
            let hands_over = matches!(cause, Termination::Completed | Termination::Killed);
            let handle = net.terminate(cause);
            state.active.retain(|h| !h.same(&handle));
            if let Some(next) = handle.take_successor() {
                if hands_over {
                    successors.push(next);
                } else {
                    tracing::debug!(net = %handle.name(), successor = %next.name(), "net failed, successor left unstarted");
                }
            }
            report.terminated.push(handle);
        }
        for next in successors {
            if state.shut_down {
                break;
            }
            if admit(&mut state, std::slice::from_ref(&next)) {
                report.started.push(next);
            } else {
                tracing::warn!(net = %next.name(), "successor could not be started");
            }
        }
        if !state.shut_down {
            self.apply_rules(&mut state, &mut report);
        }

        if state.active.is_empty() && loop_state.running.is_empty() && state.incoming.is_empty() {
            report.idle = true;
            loop_state.pacer.reset();
            if threaded {
                state.thread_running = false;
            }
        }
        report
    }

    /// Evaluate pending rules; fire those whose condition holds.
    fn apply_rules(&self, state: &mut SchedState, report: &mut PassReport) {
        let pending = std::mem::take(&mut state.rules);
        for registered in pending {
            if registered.handle.status().is_terminal() {
                continue;
            }
            if !registered.rule.condition.is_true() {
                state.rules.push(registered);
                continue;
            }
            let outcome = if fire(state, &registered.rule) {
                RuleStatus::Fired
            } else {
                RuleStatus::FireFailed
            };
            if registered.handle.settle(outcome) {
                tracing::debug!(rule = %registered.handle.id(), %outcome, "rule settled");
                report
                    .settled_rules
                    .push((registered.handle.id(), outcome));
                if outcome == RuleStatus::Fired {
                    report.started.extend(
                        registered
                            .rule
                            .start
                            .iter()
                            .filter(|n| n.status().is_active())
                            .cloned(),
                    );
                }
            }
        }
    }
}

fn dedup(nets: &[NetHandle]) -> Vec<NetHandle> {
    let mut unique: Vec<NetHandle> = Vec::with_capacity(nets.len());
    for net in nets {
        if !unique.iter().any(|u| u.same(net)) {
            unique.push(net.clone());
        }
    }
    unique
}

/// Nets among `candidates` whose actuators clash with each other.
fn overlap_within(candidates: &[NetHandle]) -> Option<(NetHandle, NetHandle)> {
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            if a.overlaps(b) {
                return Some((a.clone(), b.clone()));
            }
        }
    }
    None
}

/// Try to start `nets`, all or nothing.
fn admit(state: &mut SchedState, nets: &[NetHandle]) -> bool {
    let nets = dedup(nets);
    if let Some(net) = nets.iter().find(|n| n.status() != NetStatus::Ready) {
        tracing::warn!(net = %net.name(), status = %net.status(), "start refused, net is not READY");
        return false;
    }
    if let Some((a, b)) = overlap_within(&nets) {
        tracing::warn!(net = %a.name(), other = %b.name(), "start refused, nets share actuators");
        return false;
    }
    for net in &nets {
        if let Some(holder) = state.active.iter().find(|a| a.overlaps(net)) {
            tracing::warn!(net = %net.name(), holder = %holder.name(), "start refused, actuators in use");
            return false;
        }
    }
    activate_all(state, &nets)
}

fn activate_all(state: &mut SchedState, nets: &[NetHandle]) -> bool {
    let mut all = true;
    for net in nets {
        match net.activate() {
            Ok(active) => {
                tracing::info!(net = %net.name(), "net started");
                state.active.push(net.clone());
                state.incoming.push(active);
            }
            Err(err) => {
                tracing::warn!(net = %net.name(), %err, "net could not be activated");
                all = false;
            }
        }
    }
    all
}

/// Apply a rule whose condition holds: kill, cancel, then start.
///
/// Nothing is applied when a start is impossible. A single start that
/// clashes only with the rule's `after` predecessor is chained behind it,
/// whether the predecessor is left to complete or killed by this rule.
fn fire(state: &mut SchedState, rule: &SchedulingRule) -> bool {
    let starts = dedup(&rule.start);
    if let Some(net) = starts.iter().find(|n| n.status() != NetStatus::Ready) {
        tracing::warn!(net = %net.name(), status = %net.status(), "rule cannot start a net that is not READY");
        return false;
    }
    if overlap_within(&starts).is_some() {
        tracing::warn!("rule starts nets that share actuators");
        return false;
    }

    let killed = |net: &NetHandle| rule.kill.iter().any(|k| k.same(net));
    let mut conflicts: Vec<NetHandle> = Vec::new();
    for start in &starts {
        for holder in state.active.iter().filter(|a| !killed(a)) {
            if start.overlaps(holder) && !conflicts.iter().any(|c| c.same(holder)) {
                conflicts.push(holder.clone());
            }
        }
    }

    let handover = |pred: &NetHandle| {
        starts.len() == 1
            && killed(pred)
            && state.active.iter().any(|a| a.same(pred))
            && starts.iter().any(|s| s.overlaps(pred))
    };
    let chain_behind = match (&rule.after, conflicts.as_slice()) {
        (Some(pred), []) if handover(pred) => Some(pred.clone()),
        (_, []) => None,
        (Some(pred), [only]) if only.same(pred) && starts.len() == 1 => Some(pred.clone()),
        _ => {
            let holders: Vec<&str> = conflicts.iter().map(|c| c.name()).collect();
            tracing::warn!(?holders, "rule cannot fire, actuators in use");
            return false;
        }
    };

    for net in &rule.kill {
        net.kill();
    }
    for net in &rule.cancel {
        net.cancel();
    }
    match chain_behind {
        Some(pred) => {
            if let Some(next) = starts.first() {
                tracing::debug!(net = %next.name(), predecessor = %pred.name(), "start chained behind predecessor");
                pred.set_successor(Some(next.clone()));
            }
            true
        }
        None => activate_all(state, &starts),
    }
}
