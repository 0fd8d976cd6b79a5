pub mod compiler;
pub mod executor;
pub mod ir;
pub mod passes;

pub use compiler::TapeCompiler;
pub use executor::{ExecReport, KernelFn, KernelRegistry, TapeExecutor};
pub use ir::{Tape, TapeEntry, TapeInput, TapeOrderError};
pub use passes::{DeadCodeEliminationPass, MlpFusionPass, PassRegistry, PassReport, TapePass};
