//! Per-block list scheduling.
//!
//! Within a block the only ordering constraints are data dependencies over
//! registers, references, numbers and memory. The scheduler picks among the
//! ready nodes so that FMAs are interleaved with the loads, broadcasts and
//! address updates feeding them, keeping both the FMA ports and the load
//! ports busy.

use super::cfg::ControlFlow;
use super::ir::{Node, Program, Slot};
use log::trace;

/// Dependency edges between the nodes of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Node `j` depends on an earlier node `i` when `j` reads what `i`
    /// writes, writes what `i` reads, or writes what `i` writes.
    pub fn build(nodes: &[Node]) -> Self {
        let reads: Vec<Vec<Slot>> = nodes.iter().map(Node::reads).collect();
        let writes: Vec<Vec<Slot>> = nodes.iter().map(Node::writes).collect();
        let overlaps = |x: &[Slot], y: &[Slot]| x.iter().any(|s| y.contains(s));

        let mut graph = DependencyGraph {
            preds: vec![Vec::new(); nodes.len()],
            succs: vec![Vec::new(); nodes.len()],
        };
        for j in 0..nodes.len() {
            for i in 0..j {
                let raw = overlaps(&writes[i], &reads[j]);
                let war = overlaps(&reads[i], &writes[j]);
                let waw = overlaps(&writes[i], &writes[j]);
                if raw || war || waw {
                    graph.preds[j].push(i);
                    graph.succs[i].push(j);
                }
            }
        }
        graph
    }

    pub fn preds(&self, node: usize) -> &[usize] {
        &self.preds[node]
    }

    pub fn succs(&self, node: usize) -> &[usize] {
        &self.succs[node]
    }

    pub fn depends_on(&self, node: usize, on: usize) -> bool {
        self.preds[node].contains(&on)
    }
}

/// Returns a dependency-respecting order of `nodes` as indices into it.
///
/// Ready nodes are kept in their original order. The first pick is the first
/// ready node. After that, nodes whose FMA-ness differs from the node just
/// scheduled are preferred whenever one is ready; among the preferred set
/// the first node that does not depend on the node just scheduled wins,
/// falling back to the first of the set.
pub fn schedule_block(nodes: &[Node]) -> Vec<usize> {
    let graph = DependencyGraph::build(nodes);
    let mut pending: Vec<usize> = (0..nodes.len()).map(|i| graph.preds(i).len()).collect();
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    let mut prev: Option<usize> = None;

    while !ready.is_empty() {
        let pick = match prev {
            None => 0,
            Some(prev) => {
                let prev_fma = nodes[prev].is_fma();
                let alternating: Vec<usize> = (0..ready.len())
                    .filter(|&pos| nodes[ready[pos]].is_fma() != prev_fma)
                    .collect();
                let candidates = if alternating.is_empty() {
                    (0..ready.len()).collect()
                } else {
                    alternating
                };
                candidates
                    .iter()
                    .copied()
                    .find(|&pos| !graph.depends_on(ready[pos], prev))
                    .unwrap_or(candidates[0])
            }
        };

        let node = ready.remove(pick);
        for &succ in graph.succs(node) {
            pending[succ] -= 1;
            if pending[succ] == 0 {
                let at = ready.partition_point(|&r| r < succ);
                ready.insert(at, succ);
            }
        }
        order.push(node);
        prev = Some(node);
    }

    order
}

/// Reorders the compute nodes of every block of `program` in place.
pub fn schedule_program(program: &mut Program, flow: &ControlFlow) {
    for block in flow.blocks() {
        if block.len() < 2 {
            continue;
        }
        let original = program.nodes()[block.start..block.end].to_vec();
        let order = schedule_block(&original);
        let scheduled: Vec<Node> = order.iter().map(|&i| original[i]).collect();
        program.nodes_mut()[block.start..block.end].copy_from_slice(&scheduled);
        trace!(
            "scheduled block [{}..{}) as {:?}",
            block.start,
            block.end,
            order
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::VectorWidth;
    use crate::kernel::builder::KernelBuilder;
    use crate::kernel::KernelShape;

    fn loop_body(mr: usize, nr: usize, width: VectorWidth) -> Vec<Node> {
        let program = KernelBuilder::new(KernelShape::new(mr, nr), width)
            .and_then(KernelBuilder::build)
            .unwrap();
        let flow = ControlFlow::build(&program).unwrap();
        let body = flow.blocks()[2];
        program.nodes()[body.start..body.end].to_vec()
    }

    fn assert_respects_dependencies(nodes: &[Node], order: &[usize]) {
        let graph = DependencyGraph::build(nodes);
        let mut position = vec![usize::MAX; nodes.len()];
        for (pos, &node) in order.iter().enumerate() {
            position[node] = pos;
        }
        for node in 0..nodes.len() {
            for &pred in graph.preds(node) {
                assert!(
                    position[pred] < position[node],
                    "node {} scheduled before its dependency {}",
                    node,
                    pred
                );
            }
        }
    }

    #[test]
    fn test_order_is_a_permutation() {
        let body = loop_body(4, 8, VectorWidth::V256);
        let mut order = schedule_block(&body);
        order.sort_unstable();
        assert_eq!(order, (0..body.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_dependencies_preserved() {
        for (mr, nr, width) in [
            (4, 8, VectorWidth::V256),
            (6, 8, VectorWidth::V128),
            (3, 16, VectorWidth::V512),
            (1, 4, VectorWidth::V256),
        ] {
            let body = loop_body(mr, nr, width);
            assert_respects_dependencies(&body, &schedule_block(&body));
        }
    }

    #[test]
    fn test_b_pointer_advances_after_both_b_loads() {
        let body = loop_body(4, 8, VectorWidth::V256);
        let order = schedule_block(&body);
        let graph = DependencyGraph::build(&body);
        // The B advance is a write-after-read on both B loads.
        assert_eq!(graph.preds(2), &[0, 1]);
        let at = |i: usize| order.iter().position(|&n| n == i).unwrap();
        assert!(at(2) > at(0) && at(2) > at(1));
    }

    #[test]
    fn test_fmas_are_interleaved() {
        let body = loop_body(4, 8, VectorWidth::V256);
        let order = schedule_block(&body);
        let scheduled: Vec<Node> = order.iter().map(|&i| body[i]).collect();

        for pair in scheduled.windows(2) {
            assert!(
                !(pair[0].is_fma() && pair[1].is_fma()),
                "back-to-back FMAs in {:?}",
                order
            );
        }
        assert_eq!(
            order,
            vec![0, 1, 3, 4, 2, 5, 6, 19, 7, 8, 10, 9, 11, 12, 14, 13, 15, 16, 18, 17]
        );
    }

    #[test]
    fn test_stores_keep_program_order() {
        let program = KernelBuilder::new(KernelShape::new(2, 8), VectorWidth::V256)
            .and_then(KernelBuilder::build)
            .unwrap();
        let flow = ControlFlow::build(&program).unwrap();
        let exit = flow.blocks()[3];
        let stores = &program.nodes()[exit.start..exit.end];
        let order = schedule_block(stores);
        assert_eq!(order, (0..stores.len()).collect::<Vec<_>>());
    }
}
