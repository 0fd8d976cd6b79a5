//! Conservative MatMul → Add fusion into a single FusedMLP kernel call.

use std::collections::{HashMap, HashSet};

use super::{PassReport, TapePass};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::ops::{FusedMlpArgs, MatMulArgs, OpArgs, OpKind};
use crate::tape::ir::{Tape, TapeEntry, TapeInput};
use crate::tensor::Tensor;

/// Rewrites `Add(MatMul(x, W), b)` pairs into one FusedMLP entry.
///
/// The rewrite only fires when the MatMul output feeds exactly that one Add
/// and the Add itself has at most one in-tape consumer; anything else would
/// change the dataflow observed by sibling consumers. It is equally
/// conservative about the operands themselves: the MatMul must be plain
/// rank-2 (no transpose flags) and the Add's other operand must be a
/// `[1, M]` bias row, because that is the contraction the fused kernel
/// computes. A ReLU following the fused pair could be folded into
/// `has_relu`; this pass leaves that to a later rewrite and always emits
/// `has_relu = false`.
#[derive(Default)]
pub struct MlpFusionPass;

impl MlpFusionPass {
    pub const PRIORITY: u32 = 50;
}

struct FusionPlan {
    matmul_slot: usize,
    add_slot: usize,
    entry: TapeEntry,
    retired_add: NodeId,
    fused_id: NodeId,
}

impl TapePass for MlpFusionPass {
    fn name(&self) -> &'static str {
        "mlp-fusion"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn apply(&self, tape: &mut Tape, graph: &Graph, _roots: &[Tensor]) -> Result<PassReport> {
        // Entry slots consuming each produced id, one count per entry.
        let mut consumers: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (slot, entry) in tape.entries().iter().enumerate() {
            let mut seen = HashSet::new();
            for id in entry.input_ids() {
                if seen.insert(id) {
                    consumers.entry(id).or_default().push(slot);
                }
            }
        }

        let mut plans: Vec<FusionPlan> = Vec::new();
        let mut claimed: HashSet<usize> = HashSet::new();

        for (slot, entry) in tape.entries().iter().enumerate() {
            if entry.kind() != OpKind::MatMul || claimed.contains(&slot) {
                continue;
            }
            let matmul_consumers = consumers
                .get(&entry.node_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let [add_slot] = matmul_consumers else {
                continue;
            };
            let add_slot = *add_slot;
            if claimed.contains(&add_slot) {
                continue;
            }
            let add_entry = &tape.entries()[add_slot];
            if add_entry.kind() != OpKind::Add {
                continue;
            }
            let add_fanout = add_entry
                .outputs
                .iter()
                .map(|id| consumers.get(id).map(Vec::len).unwrap_or(0))
                .sum::<usize>();
            if add_fanout > 1 {
                continue;
            }

            if let Some(plan) = build_plan(graph, entry, slot, add_entry, add_slot)? {
                claimed.insert(slot);
                claimed.insert(add_slot);
                plans.push(plan);
            }
        }

        if plans.is_empty() {
            return Ok(PassReport::default());
        }

        let rewrites: HashMap<NodeId, NodeId> = plans
            .iter()
            .map(|plan| (plan.retired_add, plan.fused_id))
            .collect();
        let by_add_slot: HashMap<usize, usize> = plans
            .iter()
            .enumerate()
            .map(|(plan_idx, plan)| (plan.add_slot, plan_idx))
            .collect();
        let retired_matmuls: HashSet<usize> =
            plans.iter().map(|plan| plan.matmul_slot).collect();

        let fused = plans.len();
        let mut rewritten = Vec::with_capacity(tape.len() - fused);
        for (slot, entry) in tape.entries().iter().enumerate() {
            if retired_matmuls.contains(&slot) {
                continue;
            }
            if let Some(&plan_idx) = by_add_slot.get(&slot) {
                rewritten.push(plans[plan_idx].entry.clone());
                continue;
            }
            let mut entry = entry.clone();
            for input in &mut entry.inputs {
                if let Some(&replacement) = rewrites.get(&input.node) {
                    input.node = replacement;
                    input.port = 0;
                }
            }
            rewritten.push(entry);
        }
        tape.replace_entries(rewritten);

        Ok(PassReport {
            changed: true,
            rewrites: fused,
            removed: fused,
        })
    }
}

fn build_plan(
    graph: &Graph,
    matmul: &TapeEntry,
    matmul_slot: usize,
    add: &TapeEntry,
    add_slot: usize,
) -> Result<Option<FusionPlan>> {
    // The fused kernel contracts x[N,K]·W[K,M] as stored; a transposed
    // operand would compute something else, so leave those pairs alone.
    let flags = matmul.args.try_cast::<MatMulArgs>()?;
    if flags.transpose_a || flags.transpose_b {
        return Ok(None);
    }

    let matmul_node = graph
        .node(matmul.node_id)
        .ok_or(Error::MissingNode(matmul.node_id))?;
    let add_node = graph.node(add.node_id).ok_or(Error::MissingNode(add.node_id))?;

    let [x, w] = matmul_node.inputs() else {
        return Ok(None);
    };
    let bias = add_node
        .inputs()
        .iter()
        .find(|input| input.producer() != Some(matmul.node_id));
    let Some(bias) = bias else {
        // Both Add operands are the MatMul output; nothing to fuse.
        return Ok(None);
    };

    // Only an actual bias row matches the fused kernel: rank-2 result with
    // a [1, M] second operand. A full-shape Add stays unfused.
    let out_shape = &add.output_shapes[0];
    if out_shape.rank() != 2 || bias.shape().dims() != &[1, out_shape.size(1)] {
        return Ok(None);
    }

    let args = OpArgs::make(FusedMlpArgs {
        has_relu: false,
        debug_info: "matmul+add".to_string(),
    });
    let operands = [x.clone(), w.clone(), bias.clone()];
    let fused_id = graph.create_node(&operands, args.clone(), &add.output_shapes);

    let mut entry = TapeEntry::new(fused_id, args);
    for operand in &operands {
        if operand.is_pending() {
            entry.inputs.push(TapeInput {
                node: operand.producer().expect("pending tensors have producers"),
                port: operand.output_index(),
            });
        } else {
            entry.constants.push(operand.clone());
        }
    }
    entry.output_shapes = add.output_shapes.clone();
    // Publish under the retired Add id too, so roots that referenced the
    // original producer still find their result.
    entry.outputs = vec![fused_id, add.node_id];

    Ok(Some(FusionPlan {
        matmul_slot,
        add_slot,
        entry,
        retired_add: add.node_id,
        fused_id,
    }))
}
