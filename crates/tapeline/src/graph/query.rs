//! Traversal and analysis helpers over the upstream graph of a root tensor.
//!
//! These walk producer edges structurally, independent of evaluation state,
//! so they describe the graph the user built rather than what still needs
//! to run.

use std::collections::{HashMap, HashSet, VecDeque};

use super::store::{Graph, Node, NodeId};
use crate::error::Result;
use crate::tensor::Tensor;

/// Every node reachable from the root through input edges, root's producer
/// included, in post-order.
pub fn all_nodes(graph: &Graph, root: &Tensor) -> Vec<Node> {
    let ids = upstream_ids(graph, root);
    ids.into_iter()
        .filter_map(|id| graph.node(id))
        .collect()
}

/// Strict ancestors of the root: the upstream closure minus the producer
/// itself.
pub fn ancestors(graph: &Graph, root: &Tensor) -> Vec<Node> {
    let producer = root.producer();
    all_nodes(graph, root)
        .into_iter()
        .filter(|node| Some(node.id()) != producer)
        .collect()
}

/// Nodes reachable from the root's producer through consumer edges, the
/// producer itself excluded.
pub fn descendants(graph: &Graph, root: &Tensor) -> Vec<Node> {
    let Some(start) = root.producer() else {
        return Vec::new();
    };
    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    let mut found = Vec::new();
    while let Some(id) = queue.pop_front() {
        for consumer in graph.consumers(id) {
            if visited.insert(consumer) {
                if let Some(node) = graph.node(consumer) {
                    found.push(node);
                }
                queue.push_back(consumer);
            }
        }
    }
    found
}

/// Deterministic execution order for the root's upstream graph.
pub fn topological_order(graph: &Graph, root: &Tensor) -> Result<Vec<NodeId>> {
    graph.topological_order(&upstream_ids(graph, root))
}

/// Reports whether the upstream graph contains a cycle.
///
/// The public constructors cannot build one, so a `true` here means the
/// store invariants were corrupted.
pub fn has_cycles(graph: &Graph, root: &Tensor) -> bool {
    let ids = upstream_ids(graph, root);
    graph.topological_order(&ids).is_err()
}

/// Number of nodes on the longest input chain ending at the root's
/// producer. A root with no producer has depth 0.
pub fn depth(graph: &Graph, root: &Tensor) -> usize {
    let levels = node_levels(graph, root);
    levels.values().copied().max().unwrap_or(0)
}

/// Largest number of nodes sharing one level of the upstream graph.
pub fn width(graph: &Graph, root: &Tensor) -> usize {
    let levels = node_levels(graph, root);
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for level in levels.values() {
        *counts.entry(*level).or_default() += 1;
    }
    counts.values().copied().max().unwrap_or(0)
}

/// Level of each upstream node: leaves sit at 1, a node sits one above its
/// deepest input.
fn node_levels(graph: &Graph, root: &Tensor) -> HashMap<NodeId, usize> {
    let order = upstream_ids(graph, root);
    let mut levels = HashMap::with_capacity(order.len());
    // The upstream walk is post-order, so inputs are leveled first.
    for id in order {
        let Some(node) = graph.node(id) else { continue };
        let deepest = node
            .inputs()
            .iter()
            .filter_map(|input| input.producer())
            .filter_map(|producer| levels.get(&producer).copied())
            .max()
            .unwrap_or(0);
        levels.insert(id, deepest + 1);
    }
    levels
}

/// Post-order ids of the upstream closure, walking producer edges without
/// regard to evaluation state.
pub(crate) fn upstream_ids(graph: &Graph, root: &Tensor) -> Vec<NodeId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    if let Some(producer) = root.producer() {
        visit(graph, producer, &mut visited, &mut order);
    }
    order
}

fn visit(graph: &Graph, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
    if !visited.insert(id) {
        return;
    }
    if let Some(node) = graph.node(id) {
        for input in node.inputs() {
            if let Some(producer) = input.producer() {
                visit(graph, producer, visited, order);
            }
        }
        order.push(id);
    }
}
