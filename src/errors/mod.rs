// src/errors/mod.rs

//! Error handling module

pub mod unified;

pub use unified::{ElfError, KernelError, MapError, PageFaultError, Result};
