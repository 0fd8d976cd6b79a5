//! Error types surfaced by the graph, tape, and kernel layers.

use thiserror::Error;

use crate::graph::NodeId;
use crate::ops::OpKind;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An operation needs a higher-rank input than it was given.
    #[error("{op} requires rank >= {required}, got rank {actual}")]
    RankTooLow {
        op: &'static str,
        required: usize,
        actual: usize,
    },

    /// Two dimensions that must agree do not.
    #[error("{op} dimension mismatch: {detail}")]
    DimMismatch { op: &'static str, detail: String },

    /// The trailing-aligned broadcast rule rejected a shape pair.
    #[error("cannot broadcast shapes {lhs:?} and {rhs:?}")]
    BroadcastIncompatible { lhs: Vec<usize>, rhs: Vec<usize> },

    /// A dimension index is out of range for the input rank.
    #[error("{op} dimension {dim} is out of range for rank {rank}")]
    BadDim {
        op: &'static str,
        dim: usize,
        rank: usize,
    },

    /// A size parameter must be positive.
    #[error("{op} size must be positive")]
    BadSize { op: &'static str },

    /// The element count of a buffer does not match its shape.
    #[error("buffer of {actual} elements does not match shape {dims:?} ({expected} elements)")]
    ElementCountMismatch {
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// A configuration the kernels do not handle yet.
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },

    /// Topological sort found a back edge; the store invariants were broken.
    #[error("cycle detected in graph near node {0}")]
    CycleDetected(NodeId),

    /// The executor was asked to dispatch a kind with no registered handler.
    #[error("no kernel registered for operation kind {0:?}")]
    UnknownOpKind(OpKind),

    /// Assembled kernel arguments do not match the kind's required count.
    #[error("{op} expects {expected} inputs, got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An `OpArgs` downcast was attempted against a non-matching kind.
    #[error("op args hold {found}, not {requested}")]
    KindMismatch {
        requested: &'static str,
        found: &'static str,
    },

    /// A referenced node id is not present in the store.
    #[error("node {0} is not registered in the graph store")]
    MissingNode(NodeId),

    /// A kernel failed while producing its result.
    #[error("evaluation failed: {0}")]
    EvalFailure(String),
}

impl Error {
    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Error::EvalFailure(message.into())
    }

    pub(crate) fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        Error::Unimplemented {
            op,
            reason: reason.into(),
        }
    }
}
