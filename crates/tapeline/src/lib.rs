//! Lazy tensor graphs compiled to a linear tape.
//!
//! Operations build a deferred compute graph instead of running eagerly.
//! When a tensor is materialized, the transitive dependencies of the
//! requested roots are linearized into a tape, an optimization pipeline
//! rewrites it (dead-code elimination, MatMul+Add fusion), and a kernel
//! dispatcher executes the surviving entries, memoizing every node result
//! across calls.
//!
//! ```
//! use tapeline::{add, from_buffer, matmul};
//!
//! # fn main() -> tapeline::Result<()> {
//! let a = from_buffer([2, 2], vec![2.0; 4])?;
//! let b = from_buffer([2, 2], vec![3.0; 4])?;
//! let c = matmul(&a, &b, false, false)?;
//! let d = add(&c, &b)?;
//! d.eval()?;
//! assert_eq!(d.data(), &[15.0, 15.0, 15.0, 15.0]);
//! # Ok(())
//! # }
//! ```

pub mod context;
mod env;
pub mod error;
pub mod graph;
pub mod kernels;
pub mod ops;
pub mod tape;
pub mod tensor;

pub use context::{Context, EvalStats};
pub use error::{Error, Result};
pub use graph::{Graph, Node, NodeId};
pub use ops::{
    add, from_buffer, fused_mlp, matmul, multiply, ones, rand, reduce_sum, relu, split, zeros,
    OpArgs, OpKind,
};
pub use tensor::{DType, Shape, Tensor, TensorState};
