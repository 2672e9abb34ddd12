//! Integration tests for the executor loop and scheduling rules.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use rcc_core::{DeviceRegistry, Notifier};
use rcc_graph::{
    ActuatorWrite, CycleContext, Fragment, NetcommOut, Primitive, PrimitiveCore, PrimitiveError,
    PrimitiveResult, StopAfter,
};
use rcc_net::{Net, NetConfig, NetHandle, NetStatus};
use rcc_sched::{Condition, Executor, ExecutorConfig, RuleStatus, SchedulingRule};

fn notifier() -> Notifier {
    Notifier::spawn("test-notify").unwrap()
}

fn manual() -> Executor {
    Executor::manual(ExecutorConfig::default(), notifier())
}

/// A net driving `actuators`, completing after `cycles` cycles (never if 0)
/// and publishing its completion flag as `done`.
fn net(name: &str, actuators: &[&str], cycles: u64) -> NetHandle {
    let mut root = Fragment::new("root");
    for (i, device) in actuators.iter().enumerate() {
        root.add(ActuatorWrite::new(&format!("write{i}"), device).unwrap());
    }
    if cycles > 0 {
        let stop = StopAfter::new("stop", cycles).unwrap();
        let export = NetcommOut::<bool>::new("export", "done").unwrap();
        export.input().connect_to(Some(&stop.done()));
        root.completion().connect_to(Some(&stop.done()));
        root.add(stop);
        root.add(export);
    }
    let config = NetConfig::new(name, Duration::from_millis(1));
    Net::load(root, Arc::new(DeviceRegistry::new()), config, notifier()).unwrap()
}

struct Failing {
    core: PrimitiveCore,
}

impl Primitive for Failing {
    fn core(&self) -> &PrimitiveCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PrimitiveCore {
        &mut self.core
    }

    fn update_data(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        Err(PrimitiveError::Failed {
            primitive: "failing".into(),
            what: "sensor wire cut".into(),
        })
    }
}

#[test]
fn overlapping_actuators_are_exclusive() {
    let exec = manual();
    let n1 = net("n1", &["j1", "j2"], 0);
    let n2 = net("n2", &["j2"], 0);

    assert!(exec.start(&[n1.clone()]).unwrap());
    assert!(!exec.start(&[n2.clone()]).unwrap());
    assert_eq!(n1.status(), NetStatus::Running);
    assert_eq!(n2.status(), NetStatus::Ready);

    n1.kill();
    let report = exec.step();
    assert_eq!(report.terminated, vec![n1.clone()]);
    assert!(report.idle);
    assert!(n1.is_killed());

    assert!(exec.start(&[n2.clone()]).unwrap());
    assert_eq!(n2.status(), NetStatus::Running);
}

#[test]
fn concurrent_start_of_conflicting_nets_starts_neither() {
    let exec = manual();
    let n1 = net("n1", &["j1"], 0);
    let n2 = net("n2", &["j1"], 0);
    assert!(!exec.start(&[n1.clone(), n2.clone()]).unwrap());
    assert_eq!(n1.status(), NetStatus::Ready);
    assert_eq!(n2.status(), NetStatus::Ready);
}

#[test]
fn two_nets_on_one_actuator_one_wins() {
    let exec = manual();
    let n1 = net("n1", &["arm"], 0);
    let n2 = net("n2", &["arm"], 0);

    let r1 = exec.schedule(SchedulingRule::now().start(&[n1.clone()])).unwrap();
    let r2 = exec.schedule(SchedulingRule::now().start(&[n2.clone()])).unwrap();
    assert_eq!(r1.status(), RuleStatus::Fired);
    assert_eq!(r2.status(), RuleStatus::FireFailed);

    let running = [&n1, &n2]
        .iter()
        .filter(|n| n.status() == NetStatus::Running)
        .count();
    assert_eq!(running, 1);
}

#[test]
fn true_rule_fires_once_and_replays_to_late_listener() {
    let exec = manual();
    let n1 = net("n1", &[], 0);
    let rule = exec.schedule(SchedulingRule::now().start(&[n1.clone()])).unwrap();
    let rx = rule.subscribe();
    assert_eq!(rx.recv().unwrap(), RuleStatus::Fired);

    exec.step();
    exec.step();
    assert!(rx.try_recv().is_err());
    assert_eq!(exec.pending_rules(), 0);

    let (tx, late) = mpsc::channel();
    rule.listen(move |s| {
        let _ = tx.send(s);
    });
    assert_eq!(
        late.recv_timeout(Duration::from_secs(2)).unwrap(),
        RuleStatus::Fired
    );
}

#[test]
fn start_when_result_becomes_true() {
    let exec = manual();
    let n1 = net("n1", &[], 2);
    let n2 = net("n2", &[], 0);

    assert!(exec.start(&[n1.clone()]).unwrap());
    let rule = exec
        .schedule(SchedulingRule::when(Condition::all([Condition::net_result(&n1, "done")])).start(&[n2.clone()]))
        .unwrap();
    assert_eq!(rule.status(), RuleStatus::Active);

    exec.step();
    assert_eq!(n1.netcomm("done").unwrap().value, "false");
    assert_eq!(rule.status(), RuleStatus::Active);
    assert_eq!(n2.status(), NetStatus::Ready);

    let report = exec.step();
    assert_eq!(rule.status(), RuleStatus::Fired);
    assert_eq!(n2.status(), NetStatus::Running);
    assert!(report.started.contains(&n2));
    assert!(report.terminated.contains(&n1));
    assert!(n1.is_completed());
}

#[test]
fn conflicting_rule_applies_nothing() {
    let exec = manual();
    let holder = net("holder", &["j1"], 0);
    let victim = net("victim", &["j9"], 0);
    let blocked = net("blocked", &["j1"], 0);
    assert!(exec.start(&[holder.clone(), victim.clone()]).unwrap());

    let rule = exec
        .schedule(
            SchedulingRule::now()
                .kill(&[victim.clone()])
                .start(&[blocked.clone()]),
        )
        .unwrap();
    assert_eq!(rule.status(), RuleStatus::FireFailed);
    assert!(!victim.kill_requested());
    assert_eq!(blocked.status(), NetStatus::Ready);
}

#[test]
fn kill_frees_actuators_for_start_in_same_rule() {
    let exec = manual();
    let old = net("old", &["j1"], 0);
    let new = net("new", &["j1"], 0);
    assert!(exec.start(&[old.clone()]).unwrap());
    exec.step();

    let rule = exec
        .schedule(SchedulingRule::now().kill(&[old.clone()]).start(&[new.clone()]))
        .unwrap();
    assert_eq!(rule.status(), RuleStatus::Fired);

    let report = exec.step();
    assert!(report.terminated.contains(&old));
    assert_eq!(report.cycled, 1);
    assert!(old.is_killed());
    assert_eq!(new.status(), NetStatus::Running);
    assert_eq!(new.cycles(), 1);
}

#[test]
fn after_without_kill_waits_for_completion() {
    let exec = manual();
    let first = net("first", &["j1"], 2);
    let second = net("second", &["j1"], 0);
    assert!(exec.start(&[first.clone()]).unwrap());

    let rule = exec
        .schedule(SchedulingRule::now().start(&[second.clone()]).after(&first))
        .unwrap();
    assert_eq!(rule.status(), RuleStatus::Fired);
    assert_eq!(second.status(), NetStatus::Ready);
    assert_eq!(first.successor(), Some(second.clone()));

    exec.step();
    let report = exec.step();
    assert!(report.terminated.contains(&first));
    assert!(report.started.contains(&second));
    assert_eq!(second.status(), NetStatus::Running);

    let report = exec.step();
    assert_eq!(report.cycled, 1);
    assert_eq!(second.cycles(), 1);
}

#[test]
fn schedule_after_finished_predecessor_starts_now() {
    let exec = manual();
    let first = net("first", &["j1"], 1);
    let second = net("second", &["j1"], 0);
    assert!(exec.start(&[first.clone()]).unwrap());
    exec.step();
    assert_eq!(first.status(), NetStatus::Terminated);

    let rule = exec
        .schedule(SchedulingRule::now().start(&[second.clone()]).after(&first))
        .unwrap();
    assert_eq!(rule.status(), RuleStatus::Fired);
    assert_eq!(second.status(), NetStatus::Running);
}

#[test]
fn kill_after_hands_over_from_a_net_that_never_completes() {
    let exec = manual();
    let first = net("first", &["j1"], 0);
    let second = net("second", &["j1"], 0);
    assert!(exec.start(&[first.clone()]).unwrap());
    exec.step();

    let rule = exec
        .schedule(
            SchedulingRule::now()
                .kill(&[first.clone()])
                .start(&[second.clone()])
                .after(&first),
        )
        .unwrap();
    assert_eq!(rule.status(), RuleStatus::Fired);
    assert!(first.kill_requested());
    assert_eq!(first.successor(), Some(second.clone()));
    assert_eq!(second.status(), NetStatus::Ready);

    let report = exec.step();
    assert!(report.terminated.contains(&first));
    assert!(first.is_killed());
    assert!(report.started.contains(&second));
    assert_eq!(second.status(), NetStatus::Running);
    assert_eq!(exec.active(), vec![second.clone()]);

    let report = exec.step();
    assert_eq!(report.cycled, 1);
    assert_eq!(second.cycles(), 1);
}

#[test]
fn kill_after_without_shared_actuators_starts_now() {
    let exec = manual();
    let first = net("first", &["j1"], 0);
    let second = net("second", &["j2"], 0);
    assert!(exec.start(&[first.clone()]).unwrap());

    let rule = exec
        .schedule(
            SchedulingRule::now()
                .kill(&[first.clone()])
                .start(&[second.clone()])
                .after(&first),
        )
        .unwrap();
    assert_eq!(rule.status(), RuleStatus::Fired);
    assert!(first.successor().is_none());
    assert_eq!(second.status(), NetStatus::Running);

    exec.step();
    assert!(first.is_killed());
    assert_eq!(second.cycles(), 1);
}

#[test]
fn failed_predecessor_leaves_successor_ready() {
    let exec = manual();
    let mut root = Fragment::new("root");
    root.add(Failing {
        core: PrimitiveCore::new("Failing", "failing"),
    });
    let first = Net::load(
        root,
        Arc::new(DeviceRegistry::new()),
        NetConfig::new("first", Duration::from_millis(1)),
        notifier(),
    )
    .unwrap();
    let second = net("second", &[], 0);
    assert!(exec.start(&[first.clone()]).unwrap());
    first.set_successor(Some(second.clone()));

    let report = exec.step();
    assert!(report.terminated.contains(&first));
    assert!(report.started.is_empty());
    assert_eq!(second.status(), NetStatus::Ready);
}

#[test]
fn runtime_failure_terminates_only_that_net() {
    let exec = manual();
    let mut root = Fragment::new("root");
    root.add(Failing {
        core: PrimitiveCore::new("Failing", "failing"),
    });
    let bad = Net::load(
        root,
        Arc::new(DeviceRegistry::new()),
        NetConfig::new("bad", Duration::from_millis(1)),
        notifier(),
    )
    .unwrap();
    let good = net("good", &[], 0);
    assert!(exec.start(&[bad.clone(), good.clone()]).unwrap());

    let report = exec.step();
    assert_eq!(report.terminated, vec![bad.clone()]);
    assert!(bad.failure().unwrap().contains("sensor wire cut"));
    assert_eq!(good.status(), NetStatus::Running);
    assert!(!exec.step().idle);
}

#[test]
fn cancel_is_cooperative() {
    let exec = manual();
    let n1 = net("n1", &[], 0);
    assert!(exec.start(&[n1.clone()]).unwrap());
    exec.step();

    let rule = exec.schedule(SchedulingRule::now().cancel(&[n1.clone()])).unwrap();
    assert_eq!(rule.status(), RuleStatus::Fired);
    assert_eq!(n1.status(), NetStatus::Cancelling);
    exec.step();
    assert_eq!(n1.status(), NetStatus::Cancelling);
    assert_eq!(n1.cycles(), 2);
}

#[test]
fn deactivated_rule_never_fires() {
    let exec = manual();
    let n1 = net("n1", &[], 0);
    let n2 = net("n2", &[], 0);
    assert!(exec.start(&[n1.clone()]).unwrap());
    let rule = exec
        .schedule(SchedulingRule::when(Condition::net_status_is(&n1, NetStatus::Terminated)).start(&[n2.clone()]))
        .unwrap();
    assert!(rule.deactivate());
    n1.kill();
    exec.step();
    assert_eq!(rule.status(), RuleStatus::Inactive);
    assert_eq!(n2.status(), NetStatus::Ready);
    assert_eq!(exec.pending_rules(), 0);
}

#[test]
fn threaded_loop_runs_to_completion_and_goes_idle() {
    let exec = Executor::threaded(ExecutorConfig::default(), notifier());
    let n1 = net("n1", &["j1"], 3);
    assert!(exec.start(&[n1.clone()]).unwrap());
    assert_eq!(
        n1.wait_terminated(Some(Duration::from_secs(5))),
        NetStatus::Terminated
    );
    assert!(n1.is_completed());
    assert_eq!(n1.cycles(), 3);

    for _ in 0..500 {
        if !exec.is_looping() {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(!exec.is_looping());

    let n2 = net("n2", &["j1"], 2);
    assert!(exec.start(&[n2.clone()]).unwrap());
    assert_eq!(
        n2.wait_terminated(Some(Duration::from_secs(5))),
        NetStatus::Terminated
    );
}

#[test]
fn shutdown_kills_everything() {
    let exec = Executor::threaded(ExecutorConfig::default(), notifier());
    let n1 = net("n1", &[], 0);
    let n2 = net("n2", &[], 0);
    assert!(exec.start(&[n1.clone()]).unwrap());
    let pending = exec
        .schedule(SchedulingRule::when(Condition::False).start(&[n2.clone()]))
        .unwrap();

    exec.shutdown();
    assert_eq!(n1.status(), NetStatus::Terminated);
    assert!(n1.is_killed());
    assert_eq!(pending.status(), RuleStatus::Inactive);
    assert!(exec.start(&[n2]).is_err());
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    const DEVICES: [&str; 4] = ["a", "b", "c", "d"];

    proptest! {
        #[test]
        fn active_nets_never_share_actuators(masks in prop::collection::vec(0u8..16, 1..6)) {
            let exec = manual();
            let mut admitted: Vec<u8> = Vec::new();
            for (i, mask) in masks.iter().enumerate() {
                let actuators: Vec<&str> = DEVICES
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| mask >> bit & 1 == 1)
                    .map(|(_, d)| *d)
                    .collect();
                let n = net(&format!("n{i}"), &actuators, 0);
                let free = admitted.iter().all(|held| held & mask == 0);
                prop_assert_eq!(exec.start(&[n]).unwrap(), free);
                if free {
                    admitted.push(*mask);
                }
            }
            let active = exec.active();
            for (i, a) in active.iter().enumerate() {
                for b in &active[i + 1..] {
                    prop_assert!(!a.overlaps(b));
                }
            }
        }
    }
}
