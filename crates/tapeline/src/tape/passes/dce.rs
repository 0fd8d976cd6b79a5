//! Dead-code elimination over the tape.

use std::collections::HashSet;

use super::{PassReport, TapePass};
use crate::error::Result;
use crate::graph::{Graph, NodeId};
use crate::tape::ir::Tape;
use crate::tensor::Tensor;

/// Removes entries not reachable from the requested roots.
///
/// The user-built graph can contain subgraphs nobody asked for (abandoned
/// branches, constructor side effects); entries produced from those must
/// not be executed.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    pub const PRIORITY: u32 = 10;
}

impl TapePass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn apply(&self, tape: &mut Tape, _graph: &Graph, roots: &[Tensor]) -> Result<PassReport> {
        let mut worklist: Vec<NodeId> = roots
            .iter()
            .filter(|root| root.is_pending())
            .filter_map(|root| root.producer())
            .collect();

        let mut required: HashSet<NodeId> = HashSet::new();
        while let Some(id) = worklist.pop() {
            if !required.insert(id) {
                continue;
            }
            if let Some(entry) = tape.entry(id) {
                worklist.extend(entry.input_ids());
            }
        }

        let before = tape.len();
        tape.retain(|entry| {
            required.contains(&entry.node_id)
                || entry.outputs.iter().any(|output| required.contains(output))
        });
        let removed = before - tape.len();

        Ok(PassReport {
            changed: removed > 0,
            rewrites: 0,
            removed,
        })
    }
}
