//! Integration tests for fragments: ordering, gating and boundary ports.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rcc_core::{DeviceRegistry, PrimitiveId};
use rcc_graph::{
    Constant, CycleContext, Fragment, GraphError, InPort, NetBinding, OutPort, Primitive,
    PrimitiveCore, PrimitiveResult,
};

#[derive(Default)]
struct Calls {
    read: AtomicUsize,
    update: AtomicUsize,
    write: AtomicUsize,
}

/// Copies its first connected input to its output and counts phase calls.
struct Recorder {
    core: PrimitiveCore,
    inputs: Vec<InPort<f64>>,
    out: OutPort<f64>,
    calls: Arc<Calls>,
}

impl Recorder {
    fn new(name: &str, inputs: usize) -> Self {
        let mut core = PrimitiveCore::new("Recorder", name);
        let inputs = (0..inputs)
            .map(|i| core.in_port(&format!("in{i}")).unwrap())
            .collect();
        let out = core.out_port("out").unwrap();
        Self {
            core,
            inputs,
            out,
            calls: Arc::default(),
        }
    }
}

impl Primitive for Recorder {
    fn core(&self) -> &PrimitiveCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PrimitiveCore {
        &mut self.core
    }

    fn read_sensor(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.calls.read.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn update_data(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.calls.update.fetch_add(1, Ordering::Relaxed);
        let value = self.inputs.iter().find_map(|i| i.get()).unwrap_or(1.0);
        self.out.set(value + 1.0);
        Ok(())
    }

    fn write_actuator(&mut self, _ctx: &mut CycleContext<'_>) -> PrimitiveResult<()> {
        self.calls.write.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn run_cycle(root: &mut Fragment, binding: &NetBinding) {
    let devices = DeviceRegistry::new();
    let incoming = BTreeMap::new();
    let mut outgoing = BTreeMap::new();
    let cycle = binding.clock.advance();
    let mut ctx = CycleContext::new(cycle, "test", false, &devices, &incoming, &mut outgoing);
    root.read_sensor(&mut ctx).unwrap();
    root.update_data(&mut ctx).unwrap();
    root.write_actuator(&mut ctx).unwrap();
    root.update_netcomm(&mut ctx).unwrap();
}

#[test]
fn a_to_b_sees_value_with_increasing_stamps() {
    let a = Recorder::new("a", 0);
    let b = Recorder::new("b", 1);
    b.inputs[0].connect_to(Some(&a.out));
    let b_in = b.inputs[0].clone();

    let mut root = Fragment::new("root");
    root.add(b);
    root.add(a);
    let binding = NetBinding::new("n");
    root.set_net(&binding).unwrap();

    let mut last = 0;
    for expected in 1..=3 {
        run_cycle(&mut root, &binding);
        let sample = b_in.sample().unwrap();
        assert_eq!(sample.value, 2.0);
        assert_eq!(sample.cycle, expected);
        assert!(sample.cycle > last);
        last = sample.cycle;
    }
}

#[test]
fn cycle_fails_attach_without_partial_state() {
    let a = Recorder::new("a", 1);
    let b = Recorder::new("b", 1);
    a.inputs[0].connect_to(Some(&b.out));
    b.inputs[0].connect_to(Some(&a.out));

    let mut root = Fragment::new("root");
    root.add(a);
    root.add(b);
    let err = root.set_net(&NetBinding::new("n")).unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected { .. }));
    assert!(err.to_string().starts_with("Net cycle detected"));
    assert_eq!(root.sorted_children(), None);
    assert_eq!(root.core().net(), None);
    assert!(root.children().all(|c| c.core().net().is_none()));
}

#[test]
fn inactive_fragment_skips_update_and_write_but_reads() {
    let mut gate = Constant::new("gate", false).unwrap();
    let recorder = Recorder::new("p", 0);
    let calls = Arc::clone(&recorder.calls);

    let mut inner = Fragment::new("inner");
    inner.add(recorder);
    inner.in_active().connect_to(Some(&gate.out()));

    let mut root = Fragment::new("root");
    root.add(inner);
    let binding = NetBinding::new("n");
    root.set_net(&binding).unwrap();

    {
        let devices = DeviceRegistry::new();
        let incoming = BTreeMap::new();
        let mut outgoing = BTreeMap::new();
        let mut ctx = CycleContext::new(0, "n", false, &devices, &incoming, &mut outgoing);
        gate.update_data(&mut ctx).unwrap();
    }
    run_cycle(&mut root, &binding);
    assert_eq!(calls.read.load(Ordering::Relaxed), 1);
    assert_eq!(calls.update.load(Ordering::Relaxed), 0);
    assert_eq!(calls.write.load(Ordering::Relaxed), 0);

    gate.value().set(true);
    {
        let devices = DeviceRegistry::new();
        let incoming = BTreeMap::new();
        let mut outgoing = BTreeMap::new();
        let mut ctx = CycleContext::new(0, "n", false, &devices, &incoming, &mut outgoing);
        gate.update_data(&mut ctx).unwrap();
    }
    run_cycle(&mut root, &binding);
    assert_eq!(calls.read.load(Ordering::Relaxed), 2);
    assert_eq!(calls.update.load(Ordering::Relaxed), 1);
    assert_eq!(calls.write.load(Ordering::Relaxed), 1);
}

#[test]
fn nested_fragment_is_ordered_by_its_boundary_inputs() {
    let feeder = Recorder::new("feeder", 0);
    let consumer = Recorder::new("consumer", 1);

    let mut sub = Fragment::new("sub");
    let (outer_in, inner_out) = sub.expose_input::<f64>("x").unwrap();
    let worker = Recorder::new("worker", 1);
    worker.inputs[0].connect_to(Some(&inner_out));
    let exposed = sub.expose_output("y", &worker.out).unwrap();
    sub.add(worker);

    outer_in.connect_to(Some(&feeder.out));
    consumer.inputs[0].connect_to(Some(&exposed));
    let consumer_in = consumer.inputs[0].clone();

    let mut root = Fragment::new("root");
    let consumer_id = root.add(consumer);
    let sub_id = root.add(sub);
    let feeder_id = root.add(feeder);
    let binding = NetBinding::new("n");
    root.set_net(&binding).unwrap();
    assert_eq!(
        root.sorted_children(),
        Some(vec![feeder_id, sub_id, consumer_id])
    );

    run_cycle(&mut root, &binding);
    // feeder writes 2, worker 3, consumer reads the worker's stamp through the boundary
    let seen = consumer_in.sample().unwrap();
    assert_eq!(seen.value, 3.0);
    assert_eq!(seen.cycle, 1);
}

#[test]
#[should_panic(expected = "must be read through its paired out-port")]
fn reading_exposed_input_directly_panics() {
    let mut sub = Fragment::new("sub");
    let (outer_in, _inner) = sub.expose_input::<f64>("x").unwrap();
    let _ = outer_in.get();
}

#[test]
fn boundary_wired_to_its_own_output_is_rejected() {
    let mut sub = Fragment::new("sub");
    let (outer_in, inner_out) = sub.expose_input::<f64>("x").unwrap();
    let exposed = sub.expose_output("y", &inner_out).unwrap();
    outer_in.connect_to(Some(&exposed));

    assert_eq!(exposed.get(), None);
    assert!(exposed.forms_loop());

    let mut root = Fragment::new("root");
    root.add(sub);
    let err = root.set_net(&NetBinding::new("n")).unwrap_err();
    assert!(matches!(err, GraphError::ForwardingLoop { ref fragment, .. } if fragment == "sub"));
    assert_eq!(root.core().net(), None);
    assert!(root.children().all(|c| c.core().net().is_none()));
}

#[test]
fn exposing_the_same_name_twice_fails() {
    let mut sub = Fragment::new("sub");
    sub.expose_input::<f64>("x").unwrap();
    assert!(matches!(
        sub.expose_input::<f64>("x"),
        Err(GraphError::DuplicatePort { .. })
    ));
    assert!(matches!(
        sub.expose_input::<bool>("inActive"),
        Err(GraphError::DuplicatePort { .. })
    ));
}

#[test]
fn child_outputs_can_be_exposed_by_name() {
    let recorder = Recorder::new("p", 0);
    let mut sub = Fragment::new("sub");
    sub.add(recorder);
    sub.expose_child_output("result", "p", "out").unwrap();
    assert!(matches!(
        sub.expose_child_output("other", "p", "missing"),
        Err(GraphError::UnknownPort { .. })
    ));
    assert!(matches!(
        sub.expose_child_output("other", "nobody", "out"),
        Err(GraphError::UnknownChild { .. })
    ));

    let exposed = sub.core().typed_output::<f64>("result").unwrap();
    let binding = NetBinding::new("n");
    sub.set_net(&binding).unwrap();
    let mut root = sub;
    run_cycle(&mut root, &binding);
    assert_eq!(exposed.get(), Some(2.0));
    assert_eq!(exposed.write_cycle(), Some(1));
}

#[test]
fn cleanup_severs_connections_and_allows_reattach() {
    let a = Recorder::new("a", 0);
    let b = Recorder::new("b", 1);
    b.inputs[0].connect_to(Some(&a.out));
    let b_in = b.inputs[0].clone();

    let mut root = Fragment::new("root");
    root.add(a);
    root.add(b);
    root.set_net(&NetBinding::new("n")).unwrap();
    root.cleanup();

    assert!(!b_in.is_connected());
    assert_eq!(root.sorted_children(), None);
    root.set_net(&NetBinding::new("n2")).unwrap();
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn dag() -> impl Strategy<Value = (usize, Vec<u8>, Vec<usize>)> {
        (1usize..8).prop_flat_map(|n| {
            (
                Just(n),
                prop::collection::vec(any::<u8>(), n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            )
        })
    }

    proptest! {
        #[test]
        fn dag_attaches_in_topological_order((n, masks, insertion) in dag()) {
            let nodes: Vec<Recorder> = (0..n).map(|i| Recorder::new(&format!("p{i}"), n)).collect();
            let mut deps = vec![Vec::new(); n];
            for j in 0..n {
                for i in 0..j {
                    if masks[j] >> i & 1 == 1 {
                        nodes[j].inputs[i].connect_to(Some(&nodes[i].out));
                        deps[j].push(i);
                    }
                }
            }
            let ids: Vec<_> = nodes.iter().map(|p| p.id()).collect();

            let mut slots: Vec<Option<Recorder>> = nodes.into_iter().map(Some).collect();
            let mut root = Fragment::new("root");
            for &idx in &insertion {
                if let Some(node) = slots[idx].take() {
                    root.add(node);
                }
            }
            root.set_net(&NetBinding::new("n")).unwrap();

            let order = root.sorted_children().unwrap();
            prop_assert_eq!(order.len(), n);
            let pos = |id: PrimitiveId| order.iter().position(|o| *o == id).unwrap();
            for j in 0..n {
                for &i in &deps[j] {
                    prop_assert!(pos(ids[i]) < pos(ids[j]));
                }
            }
        }

        #[test]
        fn any_cycle_is_rejected(len in 1usize..6, free in 0usize..4) {
            let ring: Vec<Recorder> = (0..len).map(|i| Recorder::new(&format!("r{i}"), 1)).collect();
            for i in 0..len {
                let prev = (i + len - 1) % len;
                ring[i].inputs[0].connect_to(Some(&ring[prev].out));
            }
            let mut root = Fragment::new("root");
            for i in 0..free {
                root.add(Recorder::new(&format!("free{i}"), 0));
            }
            for node in ring {
                root.add(node);
            }
            let err = root.set_net(&NetBinding::new("n")).unwrap_err();
            match err {
                GraphError::CycleDetected { involved, .. } => prop_assert_eq!(involved.len(), len),
                other => prop_assert!(false, "unexpected error {other:?}"),
            }
            prop_assert!(root.sorted_children().is_none());
        }
    }
}
