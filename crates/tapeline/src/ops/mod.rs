pub mod args;
pub mod functional;

pub use args::{
    AddArgs, FusedMlpArgs, InputArgs, MatMulArgs, MultiplyArgs, OpArgs, OpKind, OpPayload,
    ReduceArgs, ReduceKind, ReluArgs, SplitArgs,
};
pub use functional::{
    add, from_buffer, fused_mlp, matmul, multiply, ones, rand, reduce_sum, relu, split, zeros,
};
