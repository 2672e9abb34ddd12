//! Evaluation order of a fragment's children.

use std::collections::{BTreeMap, BTreeSet};

use rcc_core::PrimitiveId;

use crate::error::{GraphError, GraphResult};
use crate::primitive::Primitive;

/// Order `children` so every child comes after the siblings it reads from.
///
/// References to primitives outside the fragment are ignored. A child that
/// reads its own output is part of a cycle. Returns indexes into `children`.
pub(crate) fn sort_children(
    fragment: &str,
    children: &[Box<dyn Primitive>],
) -> GraphResult<Vec<usize>> {
    let mut owner_index: BTreeMap<PrimitiveId, usize> = BTreeMap::new();
    for (idx, child) in children.iter().enumerate() {
        for id in child.descendant_ids() {
            owner_index.insert(id, idx);
        }
    }

    let deps: Vec<BTreeSet<usize>> = children
        .iter()
        .map(|child| {
            child
                .referenced_primitives()
                .iter()
                .filter_map(|id| owner_index.get(id).copied())
                .collect()
        })
        .collect();

    let mut placed = vec![false; children.len()];
    let mut order = Vec::with_capacity(children.len());

    loop {
        let mut progress = false;
        for idx in 0..children.len() {
            if placed[idx] {
                continue;
            }
            if deps[idx].iter().all(|&dep| dep != idx && placed[dep]) {
                placed[idx] = true;
                order.push(idx);
                progress = true;
            }
        }
        if order.len() == children.len() {
            return Ok(order);
        }
        if !progress {
            let involved = children
                .iter()
                .zip(&placed)
                .filter(|(_, done)| !**done)
                .map(|(child, _)| child.name().to_string())
                .collect();
            return Err(GraphError::CycleDetected {
                fragment: fragment.to_string(),
                involved,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{InPort, OutPort};
    use crate::primitive::PrimitiveCore;

    struct Node {
        core: PrimitiveCore,
        input_a: InPort<f64>,
        input_b: InPort<f64>,
        out: OutPort<f64>,
    }

    impl Node {
        fn new(name: &str) -> Self {
            let mut core = PrimitiveCore::new("Node", name);
            let input_a = core.in_port("a").unwrap();
            let input_b = core.in_port("b").unwrap();
            let out = core.out_port("out").unwrap();
            Self {
                core,
                input_a,
                input_b,
                out,
            }
        }
    }

    impl Primitive for Node {
        fn core(&self) -> &PrimitiveCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut PrimitiveCore {
            &mut self.core
        }
    }

    fn boxed(nodes: Vec<Node>) -> Vec<Box<dyn Primitive>> {
        nodes
            .into_iter()
            .map(|n| Box::new(n) as Box<dyn Primitive>)
            .collect()
    }

    #[test]
    fn chain_is_ordered_against_insertion() {
        let a = Node::new("a");
        let b = Node::new("b");
        let c = Node::new("c");
        c.input_a.connect_to(Some(&b.out));
        b.input_a.connect_to(Some(&a.out));
        let children = boxed(vec![c, b, a]);
        assert_eq!(sort_children("f", &children).unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn external_sources_are_ignored() {
        let outside = Node::new("outside");
        let a = Node::new("a");
        a.input_a.connect_to(Some(&outside.out));
        let children = boxed(vec![a]);
        assert_eq!(sort_children("f", &children).unwrap(), vec![0]);
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let a = Node::new("a");
        let b = Node::new("b");
        let free = Node::new("free");
        a.input_a.connect_to(Some(&b.out));
        b.input_b.connect_to(Some(&a.out));
        let children = boxed(vec![a, b, free]);
        let err = sort_children("f", &children).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                fragment: "f".into(),
                involved: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let a = Node::new("a");
        a.input_a.connect_to(Some(&a.out));
        let children = boxed(vec![a]);
        assert!(matches!(
            sort_children("f", &children),
            Err(GraphError::CycleDetected { .. })
        ));
    }
}
