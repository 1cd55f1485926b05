// src/lib.rs
//! Tiny OS process-execution core
//!
//! The part of the kernel that turns an executable image into a running
//! process and keeps it running: the syscall dispatcher, the copy-on-write
//! fork engine, the COW page-fault resolver and the ELF program loader.
//!
//! Collaborators that belong to other subsystems (physical memory, page
//! table walking, the run queue, the console) are reached through the small
//! models in [`kernel::mm`], [`kernel::scheduler`] and [`kernel::driver`],
//! so the core can be driven end to end on a host as well as on bare metal.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod errors;
pub mod kernel;

pub use arch::x86_64::trap_frame::{Reg, TrapFrame};
pub use errors::KernelError;
pub use kernel::Kernel;
pub use kernel::process::{Process, ProcessId};
