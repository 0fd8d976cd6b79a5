//! Arena-style store owning every operation node built by the frontend.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::ops::{OpArgs, OpKind};
use crate::tensor::{Shape, Tensor};

/// Stable identifier of a graph node. Ids are minted monotonically starting
/// at 1 and never reused while the store lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One recorded operation: its arguments, ordered inputs, consumers, and the
/// shapes of every output it produces.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    args: OpArgs,
    inputs: SmallVec<[Tensor; 4]>,
    consumers: SmallVec<[NodeId; 2]>,
    output_shapes: SmallVec<[Shape; 2]>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn args(&self) -> &OpArgs {
        &self.args
    }

    pub fn kind(&self) -> OpKind {
        self.args.kind()
    }

    pub fn name(&self) -> &'static str {
        self.args.name()
    }

    pub fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    /// Ids of nodes whose input lists reference this node.
    pub fn consumers(&self) -> &[NodeId] {
        &self.consumers
    }

    pub fn output_shapes(&self) -> &[Shape] {
        &self.output_shapes
    }

    pub fn output_shape(&self, index: usize) -> &Shape {
        &self.output_shapes[index]
    }
}

struct GraphInner {
    next_id: u32,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
}

impl GraphInner {
    fn new() -> Self {
        GraphInner {
            next_id: 1,
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.get(&id).map(|&slot| &self.nodes[slot])
    }
}

/// Shared store for operation nodes.
///
/// The store is interior-mutable so operation constructors can append nodes
/// through a shared reference; the engine itself runs single-threaded and
/// never contends on the lock.
pub struct Graph {
    inner: Mutex<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            inner: Mutex::new(GraphInner::new()),
        }
    }

    /// Appends a node, wiring this node into the consumer list of every
    /// input that has a producer. Returns the freshly minted id.
    pub fn create_node(
        &self,
        inputs: &[Tensor],
        args: OpArgs,
        output_shapes: &[Shape],
    ) -> NodeId {
        let mut inner = self.inner.lock().expect("graph store poisoned");
        let id = NodeId(inner.next_id);
        inner.next_id += 1;

        for input in inputs {
            if let Some(producer) = input.producer() {
                let slot = inner.index.get(&producer).copied();
                if let Some(slot) = slot {
                    inner.nodes[slot].consumers.push(id);
                }
            }
        }

        let slot = inner.nodes.len();
        inner.nodes.push(Node {
            id,
            args,
            inputs: inputs.iter().cloned().collect(),
            consumers: SmallVec::new(),
            output_shapes: output_shapes.iter().cloned().collect(),
        });
        inner.index.insert(id, slot);
        id
    }

    /// Returns a snapshot of the node with the given id.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        let inner = self.inner.lock().expect("graph store poisoned");
        inner.node(id).cloned()
    }

    /// Snapshots every node in insertion order.
    pub fn nodes(&self) -> Vec<Node> {
        let inner = self.inner.lock().expect("graph store poisoned");
        inner.nodes.clone()
    }

    /// Linear scan for nodes of one operation kind.
    pub fn nodes_of_kind(&self, kind: OpKind) -> Vec<Node> {
        let inner = self.inner.lock().expect("graph store poisoned");
        inner
            .nodes
            .iter()
            .filter(|node| node.kind() == kind)
            .cloned()
            .collect()
    }

    /// Consumer ids recorded for a node.
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        let inner = self.inner.lock().expect("graph store poisoned");
        inner
            .node(id)
            .map(|node| node.consumers.to_vec())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("graph store poisoned").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every node; the next minted id is 1 again.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("graph store poisoned");
        inner.nodes.clear();
        inner.index.clear();
        inner.next_id = 1;
    }

    /// Collects the node ids that must run to materialize the given roots,
    /// in post-order (inputs before consumers, first visit wins).
    ///
    /// Evaluated tensors contribute nothing: their buffers are captured as
    /// constants during lowering instead of being recomputed.
    pub fn dependencies(&self, roots: &[Tensor]) -> Vec<NodeId> {
        let inner = self.inner.lock().expect("graph store poisoned");
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            if root.is_pending() {
                if let Some(producer) = root.producer() {
                    collect(&inner, producer, &mut visited, &mut order);
                }
            }
        }
        order
    }

    /// Orders `set` so every producer precedes its consumers (Kahn). Ties
    /// between simultaneously ready nodes break toward the smaller id, so
    /// two runs over the same graph yield the same schedule.
    pub fn topological_order(&self, set: &[NodeId]) -> Result<Vec<NodeId>> {
        let inner = self.inner.lock().expect("graph store poisoned");

        let mut members = HashSet::with_capacity(set.len());
        let mut unique = Vec::with_capacity(set.len());
        for &id in set {
            if members.insert(id) {
                unique.push(id);
            }
        }

        let mut in_degree: HashMap<NodeId, usize> =
            unique.iter().map(|&id| (id, 0)).collect();
        let mut edges: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &id in &unique {
            let node = inner.node(id).ok_or(Error::MissingNode(id))?;
            for input in &node.inputs {
                if let Some(producer) = input.producer() {
                    if members.contains(&producer) {
                        *in_degree.get_mut(&id).expect("member id") += 1;
                        edges.entry(producer).or_default().push(id);
                    }
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(unique.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            if let Some(consumers) = edges.get(&id) {
                for &consumer in consumers {
                    let degree = in_degree.get_mut(&consumer).expect("member id");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(consumer));
                    }
                }
            }
        }

        if order.len() != unique.len() {
            let stuck = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&id, _)| id)
                .min()
                .expect("at least one unresolved node");
            return Err(Error::CycleDetected(stuck));
        }
        Ok(order)
    }
}

fn collect(
    inner: &GraphInner,
    id: NodeId,
    visited: &mut HashSet<NodeId>,
    order: &mut Vec<NodeId>,
) {
    if !visited.insert(id) {
        return;
    }
    if let Some(node) = inner.node(id) {
        let inputs: Vec<NodeId> = node
            .inputs
            .iter()
            .filter(|input| input.is_pending())
            .filter_map(|input| input.producer())
            .collect();
        for input in inputs {
            collect(inner, input, visited, order);
        }
        order.push(id);
    }
}
