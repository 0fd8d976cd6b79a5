//! Shared tensor handles that delay evaluation until the data is needed.

use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use super::{DType, Shape};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::graph::NodeId;

/// Lifecycle of a tensor spec.
///
/// `Scheduled` marks a tensor whose evaluation is in progress and guards
/// against re-entering materialization for the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorState {
    Lazy,
    Scheduled,
    Evaluated,
}

/// Shared description of either an input buffer or a deferred computation.
///
/// Sibling outputs of multi-output operations are not stored here; they are
/// derived from the producing node, so handles never own each other.
struct TensorSpec {
    shape: Shape,
    dtype: DType,
    producer: Option<NodeId>,
    output_index: usize,
    state: Mutex<TensorState>,
    data: OnceCell<Arc<[f32]>>,
}

/// Cheaply copyable handle sharing ownership of a [`TensorSpec`].
#[derive(Clone)]
pub struct Tensor {
    spec: Arc<TensorSpec>,
}

impl Tensor {
    /// Wraps an externally supplied buffer as an evaluated input tensor.
    ///
    /// Input tensors register no graph node; operation constructors capture
    /// them by value.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Tensor> {
        let shape = shape.into();
        if data.len() != shape.num_elements() {
            return Err(Error::ElementCountMismatch {
                dims: shape.dims().to_vec(),
                expected: shape.num_elements(),
                actual: data.len(),
            });
        }
        Ok(Tensor::evaluated(shape, Arc::from(data)))
    }

    /// Builds an already-evaluated tensor around a shared buffer.
    pub(crate) fn evaluated(shape: Shape, data: Arc<[f32]>) -> Tensor {
        let spec = TensorSpec {
            shape,
            dtype: DType::F32,
            producer: None,
            output_index: 0,
            state: Mutex::new(TensorState::Evaluated),
            data: OnceCell::with_value(data),
        };
        Tensor {
            spec: Arc::new(spec),
        }
    }

    /// Builds a lazy handle referencing one output of a graph node.
    pub(crate) fn lazy(shape: Shape, producer: NodeId, output_index: usize) -> Tensor {
        let spec = TensorSpec {
            shape,
            dtype: DType::F32,
            producer: Some(producer),
            output_index,
            state: Mutex::new(TensorState::Lazy),
            data: OnceCell::new(),
        };
        Tensor {
            spec: Arc::new(spec),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.spec.shape
    }

    pub fn rank(&self) -> usize {
        self.spec.shape.rank()
    }

    pub fn size(&self, dim: usize) -> usize {
        self.spec.shape.size(dim)
    }

    pub fn total_elements(&self) -> usize {
        self.spec.shape.num_elements()
    }

    pub fn dtype(&self) -> DType {
        self.spec.dtype
    }

    /// Identifier of the node that produces this tensor, if any.
    pub fn producer(&self) -> Option<NodeId> {
        self.spec.producer
    }

    /// Which output of the producer this handle refers to.
    pub fn output_index(&self) -> usize {
        self.spec.output_index
    }

    pub fn state(&self) -> TensorState {
        *self.spec.state.lock().expect("tensor state poisoned")
    }

    pub fn is_lazy(&self) -> bool {
        self.state() == TensorState::Lazy
    }

    pub fn is_scheduled(&self) -> bool {
        self.state() == TensorState::Scheduled
    }

    pub fn is_evaluated(&self) -> bool {
        self.state() == TensorState::Evaluated
    }

    /// True for handles that still need a kernel to run before data exists.
    pub(crate) fn is_pending(&self) -> bool {
        !self.is_evaluated() && self.spec.producer.is_some()
    }

    /// Materializes this tensor through the process-wide context.
    pub fn eval(&self) -> Result<()> {
        self.eval_with(Context::global())
    }

    /// Materializes this tensor through an explicit context.
    pub fn eval_with(&self, ctx: &Context) -> Result<()> {
        ctx.evaluate(self).map(|_| ())
    }

    /// Borrows the host buffer.
    ///
    /// Panics when the tensor has not been evaluated; use [`Tensor::eval`]
    /// or [`Tensor::try_data`] first.
    pub fn data(&self) -> &[f32] {
        self.try_data()
            .expect("tensor data accessed before evaluation")
    }

    /// Borrows the host buffer when the tensor is evaluated.
    pub fn try_data(&self) -> Option<&[f32]> {
        self.spec.data.get().map(|buffer| buffer.as_ref())
    }

    /// Shares the host buffer when the tensor is evaluated.
    pub(crate) fn buffer(&self) -> Option<Arc<[f32]>> {
        self.spec.data.get().cloned()
    }

    /// Marks the tensor as Scheduled. Returns false when evaluation of the
    /// same spec is already in progress (or finished), so callers can
    /// short-circuit instead of re-entering.
    pub(crate) fn mark_scheduled(&self) -> bool {
        let mut state = self.spec.state.lock().expect("tensor state poisoned");
        match *state {
            TensorState::Lazy => {
                *state = TensorState::Scheduled;
                true
            }
            TensorState::Scheduled | TensorState::Evaluated => false,
        }
    }

    /// Attaches the produced buffer and transitions to Evaluated.
    pub(crate) fn complete(&self, buffer: Arc<[f32]>) {
        let _ = self.spec.data.set(buffer);
        let mut state = self.spec.state.lock().expect("tensor state poisoned");
        *state = TensorState::Evaluated;
    }

    /// Returns a failed evaluation to the Lazy state.
    pub(crate) fn restore_lazy(&self) {
        let mut state = self.spec.state.lock().expect("tensor state poisoned");
        if *state == TensorState::Scheduled {
            *state = TensorState::Lazy;
        }
    }

    /// True when both handles share one spec.
    pub fn same_spec(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.spec, &other.spec)
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.spec.shape)
            .field("state", &self.state())
            .field("producer", &self.spec.producer)
            .field("output_index", &self.spec.output_index)
            .finish()
    }
}
