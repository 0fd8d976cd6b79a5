//! Reference f32 kernels operating on row-major host buffers.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ops::{FusedMlpArgs, MatMulArgs, OpKind, ReduceArgs, ReduceKind, SplitArgs};
use crate::tape::executor::KernelRegistry;
use crate::tape::ir::TapeEntry;
use crate::tensor::{Shape, Tensor};

/// Installs every standard kernel into the registry.
pub fn register_default_kernels(registry: &mut KernelRegistry) {
    registry.register(OpKind::Relu, Arc::new(op_relu));
    registry.register(OpKind::Add, Arc::new(|entry, inputs| {
        op_elementwise(entry, inputs, Eltwise::Add)
    }));
    registry.register(OpKind::Multiply, Arc::new(|entry, inputs| {
        op_elementwise(entry, inputs, Eltwise::Multiply)
    }));
    registry.register(OpKind::MatMul, Arc::new(op_matmul));
    registry.register(OpKind::Reduce, Arc::new(op_reduce));
    registry.register(OpKind::Split, Arc::new(op_split));
    registry.register(OpKind::FusedMlp, Arc::new(op_fused_mlp));
}

fn data_of(tensor: &Tensor) -> Result<&[f32]> {
    tensor
        .try_data()
        .ok_or_else(|| Error::eval("kernel input is not materialized"))
}

fn produced(shape: Shape, values: Vec<f32>) -> Tensor {
    Tensor::evaluated(shape, Arc::from(values))
}

fn op_relu(entry: &TapeEntry, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let values = data_of(&inputs[0])?;
    let result: Vec<f32> = values.iter().map(|&x| x.max(0.0)).collect();
    Ok(vec![produced(entry.output_shapes[0].clone(), result)])
}

#[derive(Clone, Copy)]
enum Eltwise {
    Add,
    Multiply,
}

impl Eltwise {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Eltwise::Add => a + b,
            Eltwise::Multiply => a * b,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Eltwise::Add => "add",
            Eltwise::Multiply => "multiply",
        }
    }
}

fn op_elementwise(entry: &TapeEntry, inputs: &[Tensor], op: Eltwise) -> Result<Vec<Tensor>> {
    let lhs = &inputs[0];
    let rhs = &inputs[1];
    let a = data_of(lhs)?;
    let b = data_of(rhs)?;
    let out_shape = entry.output_shapes[0].clone();

    if lhs.shape() == rhs.shape() {
        let result: Vec<f32> = a.iter().zip(b.iter()).map(|(&x, &y)| op.apply(x, y)).collect();
        return Ok(vec![produced(out_shape, result)]);
    }

    // Row-bias form [N, M] + [1, M], accepted in either operand order.
    if matches!(op, Eltwise::Add) && lhs.rank() == 2 && rhs.rank() == 2 {
        let (matrix, bias, m_dims) = if rhs.size(0) == 1 && rhs.size(1) == lhs.size(1) {
            (a, b, lhs.shape().dims())
        } else if lhs.size(0) == 1 && lhs.size(1) == rhs.size(1) {
            (b, a, rhs.shape().dims())
        } else {
            return Err(Error::unimplemented(
                "add",
                format!(
                    "broadcast {} + {} is not supported by the cpu kernel",
                    lhs.shape(),
                    rhs.shape()
                ),
            ));
        };
        let (rows, cols) = (m_dims[0], m_dims[1]);
        let mut result = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                result.push(matrix[row * cols + col] + bias[col]);
            }
        }
        return Ok(vec![produced(out_shape, result)]);
    }

    Err(Error::unimplemented(
        op.name(),
        format!(
            "broadcast {} vs {} is not supported by the cpu kernel",
            lhs.shape(),
            rhs.shape()
        ),
    ))
}

fn op_matmul(entry: &TapeEntry, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let args = entry.args.try_cast::<MatMulArgs>()?;
    let lhs = &inputs[0];
    let rhs = &inputs[1];
    if lhs.rank() != 2 || rhs.rank() != 2 {
        return Err(Error::unimplemented(
            "matmul",
            format!(
                "only rank-2 operands are supported, got {} and {}",
                lhs.shape(),
                rhs.shape()
            ),
        ));
    }

    let a = data_of(lhs)?;
    let b = data_of(rhs)?;
    let (a_rows, a_cols) = if args.transpose_a {
        (lhs.size(1), lhs.size(0))
    } else {
        (lhs.size(0), lhs.size(1))
    };
    let (b_rows, b_cols) = if args.transpose_b {
        (rhs.size(1), rhs.size(0))
    } else {
        (rhs.size(0), rhs.size(1))
    };
    if a_cols != b_rows {
        return Err(Error::DimMismatch {
            op: "matmul",
            detail: format!("inner dimensions {a_cols} and {b_rows} differ"),
        });
    }

    let mut result = vec![0.0f32; a_rows * b_cols];
    for i in 0..a_rows {
        for j in 0..b_cols {
            let mut acc = 0.0f32;
            for k in 0..a_cols {
                let a_val = if args.transpose_a {
                    a[k * a_rows + i]
                } else {
                    a[i * a_cols + k]
                };
                let b_val = if args.transpose_b {
                    b[j * b_rows + k]
                } else {
                    b[k * b_cols + j]
                };
                acc += a_val * b_val;
            }
            result[i * b_cols + j] = acc;
        }
    }
    Ok(vec![produced(entry.output_shapes[0].clone(), result)])
}

fn op_reduce(entry: &TapeEntry, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let args = entry.args.try_cast::<ReduceArgs>()?;
    let input = &inputs[0];
    let values = data_of(input)?;
    let rank = input.rank();
    let in_dims = input.shape().dims();

    // An empty dim list reduces every axis.
    let reduce_all = args.dims.is_empty();
    let reduced: Vec<bool> = (0..rank)
        .map(|axis| reduce_all || args.dims.contains(&axis))
        .collect();

    let out_shape = entry.output_shapes[0].clone();
    let out_strides = out_shape.strides();

    // Stride each input axis contributes to the output offset; reduced axes
    // contribute nothing (keepdim slots have extent 1).
    let mut axis_stride = vec![0usize; rank];
    let mut out_axis = 0usize;
    for axis in 0..rank {
        if reduced[axis] {
            if args.keepdim {
                out_axis += 1;
            }
        } else {
            axis_stride[axis] = out_strides[out_axis];
            out_axis += 1;
        }
    }

    let reduce_count: usize = (0..rank)
        .filter(|&axis| reduced[axis])
        .map(|axis| in_dims[axis])
        .product();

    let init = match args.kind {
        ReduceKind::Sum | ReduceKind::Mean => 0.0f32,
        ReduceKind::Max => f32::NEG_INFINITY,
        ReduceKind::Min => f32::INFINITY,
    };
    let mut result = vec![init; out_shape.num_elements()];

    let in_strides = input.shape().strides();
    for (linear, &value) in values.iter().enumerate() {
        let mut remainder = linear;
        let mut out_index = 0usize;
        for axis in 0..rank {
            let coord = remainder / in_strides[axis];
            remainder %= in_strides[axis];
            out_index += coord * axis_stride[axis];
        }
        let slot = &mut result[out_index];
        *slot = match args.kind {
            ReduceKind::Sum | ReduceKind::Mean => *slot + value,
            ReduceKind::Max => slot.max(value),
            ReduceKind::Min => slot.min(value),
        };
    }

    if args.kind == ReduceKind::Mean && reduce_count > 0 {
        let scale = 1.0 / reduce_count as f32;
        for slot in &mut result {
            *slot *= scale;
        }
    }

    Ok(vec![produced(out_shape, result)])
}

fn op_split(entry: &TapeEntry, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let args = entry.args.try_cast::<SplitArgs>()?;
    let input = &inputs[0];
    let values = data_of(input)?;
    let dims = input.shape().dims();
    if args.dim >= dims.len() {
        return Err(Error::BadDim {
            op: "split",
            dim: args.dim,
            rank: dims.len(),
        });
    }

    let outer: usize = dims[..args.dim].iter().product();
    let segment = dims[args.dim];
    let inner: usize = dims[args.dim + 1..].iter().product();

    let mut outputs = Vec::with_capacity(entry.output_shapes.len());
    for (index, out_shape) in entry.output_shapes.iter().enumerate() {
        let start = index * args.split_size;
        let take = args.split_size.min(segment - start);
        let mut result = Vec::with_capacity(outer * take * inner);
        for block in 0..outer {
            let offset = (block * segment + start) * inner;
            result.extend_from_slice(&values[offset..offset + take * inner]);
        }
        outputs.push(produced(out_shape.clone(), result));
    }
    Ok(outputs)
}

fn op_fused_mlp(entry: &TapeEntry, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let args = entry.args.try_cast::<FusedMlpArgs>()?;
    let (x, w, b) = (&inputs[0], &inputs[1], &inputs[2]);
    if x.rank() != 2 || w.rank() != 2 || b.rank() != 2 {
        return Err(Error::unimplemented(
            "fused_mlp",
            "only rank-2 operands are supported",
        ));
    }
    let (batch, in_features) = (x.size(0), x.size(1));
    let out_features = w.size(1);
    if w.size(0) != in_features {
        return Err(Error::DimMismatch {
            op: "fused_mlp",
            detail: format!("input features {} vs weight rows {}", in_features, w.size(0)),
        });
    }
    if b.size(0) != 1 || b.size(1) != out_features {
        return Err(Error::DimMismatch {
            op: "fused_mlp",
            detail: format!("bias {} does not match [1, {out_features}]", b.shape()),
        });
    }

    let x_data = data_of(x)?;
    let w_data = data_of(w)?;
    let b_data = data_of(b)?;
    let mut result = vec![0.0f32; batch * out_features];
    for row in 0..batch {
        for col in 0..out_features {
            let mut acc = 0.0f32;
            for k in 0..in_features {
                acc += x_data[row * in_features + k] * w_data[k * out_features + col];
            }
            acc += b_data[col];
            if args.has_relu {
                acc = acc.max(0.0);
            }
            result[row * out_features + col] = acc;
        }
    }
    Ok(vec![produced(entry.output_shapes[0].clone(), result)])
}
