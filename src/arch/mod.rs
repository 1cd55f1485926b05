// src/arch/mod.rs

//! Architecture-specific abstractions.
//!
//! The trap frame layout is plain data and is compiled on every host so the
//! core can be exercised outside the target; only the instructions behind
//! [`x86_64::tlb`] require the real machine.

pub mod x86_64;

pub use self::x86_64::trap_frame::{Reg, TrapFrame, TF_SIZE};
