//! Kernel implementations dispatched by the tape executor.

pub mod cpu;

pub use cpu::register_default_kernels;

use crate::tape::executor::KernelRegistry;

/// Registry populated with every standard kernel.
pub fn default_registry() -> KernelRegistry {
    let mut registry = KernelRegistry::new();
    register_default_kernels(&mut registry);
    registry
}
