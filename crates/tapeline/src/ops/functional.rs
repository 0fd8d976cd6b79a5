//! Operation constructors: shape inference, node registration, and the
//! free-function façade over the process-wide context.
//!
//! Each constructor computes the output shape from the inputs and
//! parameters, registers a node in the context's graph store, and returns a
//! lazy handle. Constant constructors (`zeros`, `ones`, `rand`,
//! `from_buffer`) produce evaluated tensors and register nothing.

use rand::Rng;
use smallvec::SmallVec;
use std::sync::Arc;

use super::args::{
    AddArgs, FusedMlpArgs, MatMulArgs, MultiplyArgs, OpArgs, ReduceArgs, ReduceKind, ReluArgs,
    SplitArgs,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::tensor::{Shape, Tensor};

impl Context {
    pub fn matmul(
        &self,
        a: &Tensor,
        b: &Tensor,
        transpose_a: bool,
        transpose_b: bool,
    ) -> Result<Tensor> {
        let shape = matmul_shape(a.shape(), b.shape(), transpose_a, transpose_b)?;
        let args = OpArgs::make(MatMulArgs {
            transpose_a,
            transpose_b,
        });
        let id = self
            .graph()
            .create_node(&[a.clone(), b.clone()], args, std::slice::from_ref(&shape));
        Ok(Tensor::lazy(shape, id, 0))
    }

    pub fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let shape = Shape::broadcast(a.shape(), b.shape())?;
        let id = self.graph().create_node(
            &[a.clone(), b.clone()],
            OpArgs::make(AddArgs),
            std::slice::from_ref(&shape),
        );
        Ok(Tensor::lazy(shape, id, 0))
    }

    pub fn multiply(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let shape = Shape::broadcast(a.shape(), b.shape())?;
        let id = self.graph().create_node(
            &[a.clone(), b.clone()],
            OpArgs::make(MultiplyArgs),
            std::slice::from_ref(&shape),
        );
        Ok(Tensor::lazy(shape, id, 0))
    }

    pub fn relu(&self, input: &Tensor) -> Result<Tensor> {
        let shape = input.shape().clone();
        let id = self.graph().create_node(
            std::slice::from_ref(input),
            OpArgs::make(ReluArgs { inplace: false }),
            std::slice::from_ref(&shape),
        );
        Ok(Tensor::lazy(shape, id, 0))
    }

    /// Splits along `dim` into chunks of `split_size`; the last chunk keeps
    /// whatever remains. One node, one sibling handle per chunk.
    pub fn split(&self, input: &Tensor, split_size: usize, dim: usize) -> Result<Vec<Tensor>> {
        let shapes = split_shapes(input.shape(), split_size, dim)?;
        let id = self.graph().create_node(
            std::slice::from_ref(input),
            OpArgs::make(SplitArgs { split_size, dim }),
            &shapes,
        );
        Ok(shapes
            .into_iter()
            .enumerate()
            .map(|(index, shape)| Tensor::lazy(shape, id, index))
            .collect())
    }

    /// Sums along `dims`; an empty list reduces every axis down to `{1}`.
    pub fn reduce_sum(&self, input: &Tensor, dims: &[usize], keepdim: bool) -> Result<Tensor> {
        let shape = reduce_shape(input.shape(), dims, keepdim)?;
        let args = OpArgs::make(ReduceArgs {
            dims: SmallVec::from_slice(dims),
            keepdim,
            kind: ReduceKind::Sum,
        });
        let id = self
            .graph()
            .create_node(std::slice::from_ref(input), args, std::slice::from_ref(&shape));
        Ok(Tensor::lazy(shape, id, 0))
    }

    pub fn fused_mlp(
        &self,
        input: &Tensor,
        weights: &Tensor,
        bias: &Tensor,
        has_relu: bool,
    ) -> Result<Tensor> {
        let shape = fused_mlp_shape(input.shape(), weights.shape(), bias.shape())?;
        let debug_info = if has_relu {
            "matmul+add+relu".to_string()
        } else {
            "matmul+add".to_string()
        };
        let args = OpArgs::make(FusedMlpArgs {
            has_relu,
            debug_info,
        });
        let id = self.graph().create_node(
            &[input.clone(), weights.clone(), bias.clone()],
            args,
            std::slice::from_ref(&shape),
        );
        Ok(Tensor::lazy(shape, id, 0))
    }
}

fn matmul_shape(a: &Shape, b: &Shape, transpose_a: bool, transpose_b: bool) -> Result<Shape> {
    if a.rank() < 2 {
        return Err(Error::RankTooLow {
            op: "matmul",
            required: 2,
            actual: a.rank(),
        });
    }
    if b.rank() < 2 {
        return Err(Error::RankTooLow {
            op: "matmul",
            required: 2,
            actual: b.rank(),
        });
    }

    let (a_rows, a_cols) = trailing_matrix(a, transpose_a);
    let (b_rows, b_cols) = trailing_matrix(b, transpose_b);
    if a_cols != b_rows {
        return Err(Error::DimMismatch {
            op: "matmul",
            detail: format!("inner dimensions {a_cols} and {b_rows} differ"),
        });
    }

    let batch = broadcast_batch(
        &a.dims()[..a.rank() - 2],
        &b.dims()[..b.rank() - 2],
    )
    .ok_or_else(|| Error::BroadcastIncompatible {
        lhs: a.dims().to_vec(),
        rhs: b.dims().to_vec(),
    })?;

    let mut dims = batch;
    dims.push(a_rows);
    dims.push(b_cols);
    Ok(Shape::new(dims))
}

fn trailing_matrix(shape: &Shape, transpose: bool) -> (usize, usize) {
    let rank = shape.rank();
    let (rows, cols) = (shape.size(rank - 2), shape.size(rank - 1));
    if transpose {
        (cols, rows)
    } else {
        (rows, cols)
    }
}

/// Trailing-aligned broadcast over raw (possibly empty) batch dims.
fn broadcast_batch(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut dims = vec![1usize; rank];
    for offset in 0..rank {
        let a = lhs
            .len()
            .checked_sub(offset + 1)
            .map(|axis| lhs[axis])
            .unwrap_or(1);
        let b = rhs
            .len()
            .checked_sub(offset + 1)
            .map(|axis| rhs[axis])
            .unwrap_or(1);
        if a != b && a != 1 && b != 1 {
            return None;
        }
        dims[rank - 1 - offset] = a.max(b);
    }
    Some(dims)
}

fn split_shapes(shape: &Shape, split_size: usize, dim: usize) -> Result<Vec<Shape>> {
    if dim >= shape.rank() {
        return Err(Error::BadDim {
            op: "split",
            dim,
            rank: shape.rank(),
        });
    }
    if split_size == 0 {
        return Err(Error::BadSize { op: "split" });
    }

    let segment = shape.size(dim);
    let chunks = segment.div_ceil(split_size);
    let mut shapes = Vec::with_capacity(chunks);
    for chunk in 0..chunks {
        let remaining = segment - chunk * split_size;
        let mut dims = shape.dims().to_vec();
        dims[dim] = split_size.min(remaining);
        shapes.push(Shape::new(dims));
    }
    Ok(shapes)
}

fn reduce_shape(shape: &Shape, dims: &[usize], keepdim: bool) -> Result<Shape> {
    for &dim in dims {
        if dim >= shape.rank() {
            return Err(Error::BadDim {
                op: "reduce_sum",
                dim,
                rank: shape.rank(),
            });
        }
    }

    let reduce_all = dims.is_empty();
    let mut out = Vec::with_capacity(shape.rank());
    for axis in 0..shape.rank() {
        let reduced = reduce_all || dims.contains(&axis);
        if reduced {
            if keepdim {
                out.push(1);
            }
        } else {
            out.push(shape.size(axis));
        }
    }
    if out.is_empty() {
        out.push(1);
    }
    Ok(Shape::new(out))
}

fn fused_mlp_shape(x: &Shape, w: &Shape, b: &Shape) -> Result<Shape> {
    for (name, shape) in [("input", x), ("weights", w), ("bias", b)] {
        if shape.rank() != 2 {
            return Err(Error::DimMismatch {
                op: "fused_mlp",
                detail: format!("{name} must be rank-2, got {shape}"),
            });
        }
    }
    if w.size(0) != x.size(1) {
        return Err(Error::DimMismatch {
            op: "fused_mlp",
            detail: format!("input features {} vs weight rows {}", x.size(1), w.size(0)),
        });
    }
    if b.size(0) != 1 || b.size(1) != w.size(1) {
        return Err(Error::DimMismatch {
            op: "fused_mlp",
            detail: format!("bias {b} does not match [1, {}]", w.size(1)),
        });
    }
    Ok(Shape::new([x.size(0), w.size(1)]))
}

/// Zero-filled input tensor.
pub fn zeros(shape: impl Into<Shape>) -> Tensor {
    let shape = shape.into();
    let len = shape.num_elements();
    Tensor::evaluated(shape, Arc::from(vec![0.0f32; len]))
}

/// One-filled input tensor.
pub fn ones(shape: impl Into<Shape>) -> Tensor {
    let shape = shape.into();
    let len = shape.num_elements();
    Tensor::evaluated(shape, Arc::from(vec![1.0f32; len]))
}

/// Input tensor with uniform samples from `[0, 1)`.
pub fn rand(shape: impl Into<Shape>) -> Tensor {
    let shape = shape.into();
    let len = shape.num_elements();
    let mut rng = rand::thread_rng();
    let values: Vec<f32> = (0..len).map(|_| rng.gen::<f32>()).collect();
    Tensor::evaluated(shape, Arc::from(values))
}

/// Wraps an externally supplied buffer, validating its length.
pub fn from_buffer(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Tensor> {
    Tensor::from_vec(shape, data)
}

pub fn matmul(a: &Tensor, b: &Tensor, transpose_a: bool, transpose_b: bool) -> Result<Tensor> {
    Context::global().matmul(a, b, transpose_a, transpose_b)
}

pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Context::global().add(a, b)
}

pub fn multiply(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Context::global().multiply(a, b)
}

pub fn relu(input: &Tensor) -> Result<Tensor> {
    Context::global().relu(input)
}

pub fn split(input: &Tensor, split_size: usize, dim: usize) -> Result<Vec<Tensor>> {
    Context::global().split(input, split_size, dim)
}

pub fn reduce_sum(input: &Tensor, dims: &[usize], keepdim: bool) -> Result<Tensor> {
    Context::global().reduce_sum(input, dims, keepdim)
}

pub fn fused_mlp(input: &Tensor, weights: &Tensor, bias: &Tensor, has_relu: bool) -> Result<Tensor> {
    Context::global().fused_mlp(input, weights, bias, has_relu)
}
