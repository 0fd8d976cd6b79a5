//! The evaluation context: graph store, registries, and the memoizing
//! evaluation manager sitting above the tape compiler and executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::kernels;
use crate::tape::compiler::TapeCompiler;
use crate::tape::executor::{KernelRegistry, TapeExecutor};
use crate::tape::ir::Tape;
use crate::tape::passes::{PassRegistry, TapePass};
use crate::tensor::Tensor;

/// Counters exposed by [`Context::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvalStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Tape entries whose kernels actually ran.
    pub operations_executed: u64,
    /// Bytes of result buffers produced by those kernels.
    pub memory_allocated: u64,
}

#[derive(Default)]
struct EvalState {
    cache: HashMap<NodeId, Vec<Tensor>>,
    stats: EvalStats,
}

static GLOBAL_CONTEXT: Lazy<Context> = Lazy::new(Context::new);

/// Owns everything one evaluation universe needs: the node store, the
/// kernel and pass registries, the optimization switch, and the cross-call
/// result cache.
///
/// The free-function API operates on [`Context::global`]; tests and
/// embedders can run any number of private contexts side by side.
pub struct Context {
    graph: Graph,
    kernels: KernelRegistry,
    passes: PassRegistry,
    optimize: AtomicBool,
    state: Mutex<EvalState>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    /// A context wired with the standard kernels and default passes.
    pub fn new() -> Self {
        Context::with_parts(kernels::default_registry(), PassRegistry::with_default_passes())
    }

    /// A context with caller-supplied registries. Registries are frozen
    /// once evaluation starts.
    pub fn with_parts(kernels: KernelRegistry, passes: PassRegistry) -> Self {
        let optimize = crate::env::optimize_override().unwrap_or(true);
        Context {
            graph: Graph::new(),
            kernels,
            passes,
            optimize: AtomicBool::new(optimize),
            state: Mutex::new(EvalState::default()),
        }
    }

    /// The process-wide context backing the free-function API.
    pub fn global() -> &'static Context {
        &GLOBAL_CONTEXT
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Adds a pass to this context's pipeline (setup time only).
    pub fn register_pass(&mut self, pass: Arc<dyn TapePass>) {
        self.passes.register(pass);
    }

    pub fn optimization_enabled(&self) -> bool {
        self.optimize.load(Ordering::Relaxed)
    }

    pub fn set_optimization_enabled(&self, enabled: bool) {
        self.optimize.store(enabled, Ordering::Relaxed);
    }

    /// Compiles a tape for the given roots without executing it.
    pub fn compile(&self, roots: &[Tensor]) -> Result<Tape> {
        TapeCompiler::new(&self.graph, &self.passes, self.optimization_enabled()).compile(roots)
    }

    /// Materializes one tensor, memoizing every node result the run
    /// produces.
    pub fn evaluate(&self, tensor: &Tensor) -> Result<Tensor> {
        if tensor.is_evaluated() {
            let mut state = self.state.lock().expect("eval state poisoned");
            state.stats.cache_hits += 1;
            return Ok(tensor.clone());
        }
        // Re-entered while this spec is already being materialized.
        if tensor.is_scheduled() {
            return Ok(tensor.clone());
        }
        let producer = tensor
            .producer()
            .ok_or_else(|| Error::eval("lazy tensor has no producer node"))?;

        {
            let mut state = self.state.lock().expect("eval state poisoned");
            if let Some(cached) = state.cache.get(&producer) {
                let result = cached.get(tensor.output_index()).cloned();
                if let Some(result) = result {
                    state.stats.cache_hits += 1;
                    drop(state);
                    if let Some(buffer) = result.buffer() {
                        tensor.complete(buffer);
                    }
                    return Ok(tensor.clone());
                }
            }
            state.stats.cache_misses += 1;
        }

        if !tensor.mark_scheduled() {
            return Ok(tensor.clone());
        }
        match self.run_tape(tensor, producer) {
            Ok(buffer) => {
                tensor.complete(buffer);
                Ok(tensor.clone())
            }
            Err(err) => {
                tensor.restore_lazy();
                Err(err)
            }
        }
    }

    /// Materializes several roots; shared subgraphs run once thanks to the
    /// node cache.
    pub fn evaluate_many(&self, roots: &[Tensor]) -> Result<Vec<Tensor>> {
        roots.iter().map(|root| self.evaluate(root)).collect()
    }

    fn run_tape(&self, root: &Tensor, producer: NodeId) -> Result<std::sync::Arc<[f32]>> {
        let mut tape = self.compile(&[root.clone()])?;

        let mut executor = TapeExecutor::new(&self.kernels);
        {
            let state = self.state.lock().expect("eval state poisoned");
            for entry in tape.entries() {
                if let Some(cached) = state.cache.get(&entry.node_id) {
                    executor.seed_result(entry.node_id, cached.clone());
                }
            }
        }

        let run = executor.execute_tape(&mut tape).map(|_| ());
        let report = executor.report();
        let produced = executor.into_results();

        let mut state = self.state.lock().expect("eval state poisoned");
        // Fully computed buffers stay cached even when a later entry failed.
        for (id, outputs) in produced {
            state.cache.entry(id).or_insert(outputs);
        }
        state.stats.operations_executed += report.executed;
        state.stats.memory_allocated += report.bytes_allocated;
        run?;

        let outputs = state
            .cache
            .get(&producer)
            .ok_or_else(|| Error::eval(format!("no result produced for {producer}")))?;
        let result = outputs
            .get(root.output_index())
            .ok_or_else(|| Error::eval(format!("{producer} produced no output port {}", root.output_index())))?;
        result
            .buffer()
            .ok_or_else(|| Error::eval("produced tensor carries no buffer"))
    }

    /// Drops all cached results and resets statistics.
    pub fn clear_cache(&self) {
        let mut state = self.state.lock().expect("eval state poisoned");
        state.cache.clear();
        state.stats = EvalStats::default();
    }

    pub fn stats(&self) -> EvalStats {
        self.state.lock().expect("eval state poisoned").stats
    }

    /// Clears both the graph store and the evaluation cache.
    pub fn reset(&self) {
        self.graph.clear();
        self.clear_cache();
    }
}
