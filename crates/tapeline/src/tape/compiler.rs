//! Lowers the dependency closure of a root set into a linear tape.

use super::ir::{Tape, TapeEntry, TapeInput};
use super::passes::PassRegistry;
use crate::error::{Error, Result};
use crate::graph::{Graph, Node};
use crate::tensor::Tensor;

/// Compiles root tensors into an executable tape.
pub struct TapeCompiler<'a> {
    graph: &'a Graph,
    passes: &'a PassRegistry,
    optimize: bool,
}

impl<'a> TapeCompiler<'a> {
    pub fn new(graph: &'a Graph, passes: &'a PassRegistry, optimize: bool) -> Self {
        TapeCompiler {
            graph,
            passes,
            optimize,
        }
    }

    /// Emits one entry per node in the transitive closure of the roots,
    /// producers before consumers, then runs the pass pipeline.
    ///
    /// Roots that already carry data compile to nothing; an empty root set
    /// compiles to an empty tape.
    pub fn compile(&self, roots: &[Tensor]) -> Result<Tape> {
        let dependencies = self.graph.dependencies(roots);
        let order = self.graph.topological_order(&dependencies)?;

        let mut tape = Tape::new();
        for id in order {
            let node = self.graph.node(id).ok_or(Error::MissingNode(id))?;
            tape.push(lower_node(&node));
        }

        if self.optimize {
            self.passes.run(&mut tape, self.graph, roots)?;
        }
        Ok(tape)
    }
}

/// Turns one graph node into a tape entry: pending inputs become lazy
/// references to their producer's output port, evaluated inputs are
/// captured by value.
fn lower_node(node: &Node) -> TapeEntry {
    let mut entry = TapeEntry::new(node.id(), node.args().clone());
    for input in node.inputs() {
        if input.is_pending() {
            entry.inputs.push(TapeInput {
                node: input.producer().expect("pending tensors have producers"),
                port: input.output_index(),
            });
        } else {
            entry.constants.push(input.clone());
        }
    }
    entry.is_constant = entry.inputs.is_empty();
    entry.output_shapes = node.output_shapes().to_vec();
    entry
}
