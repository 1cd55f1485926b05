// src/arch/x86_64/mod.rs
//! x86_64 architecture-specific implementations.

/// Trap frame layout shared by the trap entry path and the kernel core.
pub mod trap_frame;
/// TLB maintenance for replaced user mappings.
pub mod tlb;

pub use trap_frame::{Reg, TrapFrame};
