//! Priority-ordered registry of tape optimization passes.

mod dce;
mod fusion;

use std::sync::Arc;

pub use dce::DeadCodeEliminationPass;
pub use fusion::MlpFusionPass;

use crate::error::Result;
use crate::graph::Graph;
use crate::tape::ir::Tape;
use crate::tensor::Tensor;

/// Statistics returned by a pass after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Whether the pass changed the tape.
    pub changed: bool,
    /// Number of rewrites applied (e.g. fused pairs).
    pub rewrites: usize,
    /// Entries removed from the tape.
    pub removed: usize,
}

impl PassReport {
    /// Merges two reports, accumulating statistics.
    pub fn merge(self, other: PassReport) -> PassReport {
        PassReport {
            changed: self.changed || other.changed,
            rewrites: self.rewrites + other.rewrites,
            removed: self.removed + other.removed,
        }
    }
}

/// A transformation over the tape, invoked in priority order.
///
/// Every pass must leave the tape topologically valid (inputs produced
/// before consumers) and with a rebuilt id index.
pub trait TapePass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Smaller priorities run first; ties break on the pass name.
    fn priority(&self) -> u32;

    fn apply(&self, tape: &mut Tape, graph: &Graph, roots: &[Tensor]) -> Result<PassReport>;
}

/// Registry applying passes in ascending (priority, name) order.
pub struct PassRegistry {
    passes: Vec<Arc<dyn TapePass>>,
}

impl Default for PassRegistry {
    fn default() -> Self {
        PassRegistry::with_default_passes()
    }
}

impl PassRegistry {
    pub fn empty() -> Self {
        PassRegistry { passes: Vec::new() }
    }

    /// Registry preloaded with dead-code elimination and MLP fusion.
    pub fn with_default_passes() -> Self {
        let mut registry = PassRegistry::empty();
        registry.register(Arc::new(DeadCodeEliminationPass));
        registry.register(Arc::new(MlpFusionPass));
        registry
    }

    pub fn register(&mut self, pass: Arc<dyn TapePass>) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Applies every registered pass once, in deterministic order.
    pub fn run(&self, tape: &mut Tape, graph: &Graph, roots: &[Tensor]) -> Result<PassReport> {
        let mut order: Vec<usize> = (0..self.passes.len()).collect();
        order.sort_by(|&a, &b| {
            let pa = &self.passes[a];
            let pb = &self.passes[b];
            pa.priority()
                .cmp(&pb.priority())
                .then_with(|| pa.name().cmp(pb.name()))
        });

        let mut totals = PassReport::default();
        for slot in order {
            let pass = &self.passes[slot];
            let report = pass.apply(tape, graph, roots)?;
            totals = totals.merge(report);
            if crate::env::pass_stats_enabled() {
                println!(
                    "[tape] pass={} changed={} rewrites={} removed={} len={}",
                    pass.name(),
                    report.changed,
                    report.rewrites,
                    report.removed,
                    tape.len()
                );
            }
        }
        Ok(totals)
    }
}
