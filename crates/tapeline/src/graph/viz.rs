//! Text renderings of the upstream graph of a root tensor.
//!
//! Node ids are stable per run, so repeated renders of the same graph are
//! byte-identical.

use std::collections::HashSet;

use super::query::upstream_ids;
use super::store::{Graph, NodeId};
use crate::tensor::Tensor;

/// Renders the upstream graph in Graphviz DOT format.
pub fn to_dot(graph: &Graph, root: &Tensor, title: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{title}\" {{\n"));
    out.push_str("  rankdir=BT;\n");
    out.push_str("  node [shape=box, fontname=\"monospace\"];\n");
    for id in upstream_ids(graph, root) {
        let Some(node) = graph.node(id) else { continue };
        let shape = node.output_shape(0);
        out.push_str(&format!(
            "  {id} [label=\"{id}: {}\\n{shape}\"];\n",
            node.name()
        ));
        let mut constants = 0usize;
        for input in node.inputs() {
            match input.producer() {
                Some(producer) => {
                    out.push_str(&format!("  {producer} -> {id};\n"));
                }
                None => {
                    constants += 1;
                    out.push_str(&format!(
                        "  \"{id}_c{constants}\" [label=\"const {}\", shape=ellipse];\n",
                        input.shape()
                    ));
                    out.push_str(&format!("  \"{id}_c{constants}\" -> {id};\n"));
                }
            }
        }
    }
    out.push_str("}\n");
    out
}

/// Renders the upstream graph as an indented ASCII tree rooted at the
/// producer. Nodes already printed once are marked instead of re-expanded.
pub fn to_ascii(graph: &Graph, root: &Tensor) -> String {
    let mut out = String::new();
    match root.producer() {
        Some(producer) => {
            let mut printed = HashSet::new();
            ascii_node(graph, producer, 0, &mut printed, &mut out);
        }
        None => {
            out.push_str(&format!("const {}\n", root.shape()));
        }
    }
    out
}

fn ascii_node(
    graph: &Graph,
    id: NodeId,
    indent: usize,
    printed: &mut HashSet<NodeId>,
    out: &mut String,
) {
    let pad = "  ".repeat(indent);
    let Some(node) = graph.node(id) else {
        out.push_str(&format!("{pad}{id} <missing>\n"));
        return;
    };
    if !printed.insert(id) {
        out.push_str(&format!("{pad}{id} {} (shared)\n", node.name()));
        return;
    }
    out.push_str(&format!(
        "{pad}{id} {} -> {}\n",
        node.name(),
        node.output_shape(0)
    ));
    for input in node.inputs() {
        match input.producer() {
            Some(producer) => ascii_node(graph, producer, indent + 1, printed, out),
            None => out.push_str(&format!("{}const {}\n", "  ".repeat(indent + 1), input.shape())),
        }
    }
}
