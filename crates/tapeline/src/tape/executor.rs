//! Kernel registry and the dispatcher that runs a compiled tape.

use std::collections::HashMap;
use std::sync::Arc;

use super::ir::{Tape, TapeEntry};
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::ops::OpKind;
use crate::tensor::Tensor;

/// A kernel handler: receives the entry (for its arguments and output
/// shapes) and the assembled input tensors, and returns one evaluated
/// tensor per output shape.
pub type KernelFn = Arc<dyn Fn(&TapeEntry, &[Tensor]) -> Result<Vec<Tensor>> + Send + Sync>;

/// Dense handler table indexed by operation kind.
#[derive(Clone)]
pub struct KernelRegistry {
    handlers: Vec<Option<KernelFn>>,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        KernelRegistry::new()
    }
}

impl KernelRegistry {
    pub fn new() -> Self {
        KernelRegistry {
            handlers: vec![None; OpKind::COUNT],
        }
    }

    pub fn register(&mut self, kind: OpKind, handler: KernelFn) {
        self.handlers[kind.index()] = Some(handler);
    }

    pub fn get(&self, kind: OpKind) -> Option<&KernelFn> {
        self.handlers[kind.index()].as_ref()
    }

    pub fn is_registered(&self, kind: OpKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn registered_count(&self) -> usize {
        self.handlers.iter().filter(|slot| slot.is_some()).count()
    }
}

/// What one tape run actually did, for the evaluation statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecReport {
    /// Entries whose kernels ran (seeded entries are not counted).
    pub executed: u64,
    /// Bytes of result buffers produced by those kernels.
    pub bytes_allocated: u64,
}

/// Executes tape entries in order, threading results between them.
pub struct TapeExecutor<'k> {
    kernels: &'k KernelRegistry,
    results: HashMap<NodeId, Vec<Tensor>>,
    report: ExecReport,
}

impl<'k> TapeExecutor<'k> {
    pub fn new(kernels: &'k KernelRegistry) -> Self {
        TapeExecutor {
            kernels,
            results: HashMap::new(),
            report: ExecReport::default(),
        }
    }

    /// Pre-publishes results computed by an earlier run, so matching
    /// entries are skipped instead of re-executed.
    pub fn seed_result(&mut self, id: NodeId, outputs: Vec<Tensor>) {
        self.results.insert(id, outputs);
    }

    /// Runs every entry in tape order. A failing kernel aborts the rest of
    /// the tape; results published so far stay readable.
    pub fn execute_tape(&mut self, tape: &mut Tape) -> Result<ExecReport> {
        for entry in tape.entries_mut() {
            self.execute_entry(entry)?;
        }
        Ok(self.report)
    }

    /// Work performed so far, including runs that later failed.
    pub fn report(&self) -> ExecReport {
        self.report
    }

    fn execute_entry(&mut self, entry: &mut TapeEntry) -> Result<()> {
        if let Some(existing) = self.results.get(&entry.node_id) {
            entry.results = existing.clone();
            entry.is_evaluated = true;
            return Ok(());
        }

        // Lazy results first, then captured constants, each in recorded order.
        let mut args = Vec::with_capacity(entry.inputs.len() + entry.constants.len());
        for input in &entry.inputs {
            let produced = self
                .results
                .get(&input.node)
                .ok_or_else(|| Error::eval(format!("missing result for input {}", input.node)))?;
            let tensor = produced.get(input.port).ok_or_else(|| {
                Error::eval(format!(
                    "input {} has no output port {}",
                    input.node, input.port
                ))
            })?;
            args.push(tensor.clone());
        }
        args.extend(entry.constants.iter().cloned());

        let kind = entry.kind();
        let expected = kind.arity();
        if args.len() != expected {
            return Err(Error::Arity {
                op: kind.name(),
                expected,
                actual: args.len(),
            });
        }

        let handler = self.kernels.get(kind).ok_or(Error::UnknownOpKind(kind))?;
        let outputs = handler(entry, &args)?;
        if outputs.len() != entry.output_shapes.len() {
            return Err(Error::eval(format!(
                "{} produced {} outputs, expected {}",
                kind.name(),
                outputs.len(),
                entry.output_shapes.len()
            )));
        }

        self.report.executed += 1;
        for output in &outputs {
            self.report.bytes_allocated +=
                (output.total_elements() * output.dtype().size_in_bytes()) as u64;
        }

        for &id in &entry.outputs {
            self.results.insert(id, outputs.clone());
        }
        entry.results = outputs;
        entry.is_evaluated = true;
        Ok(())
    }

    /// Results published for a node id.
    pub fn result(&self, id: NodeId) -> Option<&[Tensor]> {
        self.results.get(&id).map(Vec::as_slice)
    }

    /// Consumes the executor, handing back every published result.
    pub fn into_results(self) -> HashMap<NodeId, Vec<Tensor>> {
        self.results
    }
}
