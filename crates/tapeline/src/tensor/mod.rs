pub mod dtype;
pub mod lazy;
pub mod shape;

pub use dtype::DType;
pub use lazy::{Tensor, TensorState};
pub use shape::{Shape, MAX_RANK};
