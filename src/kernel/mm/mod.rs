// src/kernel/mm/mod.rs
//! メモリ管理モジュール

pub mod frame;
pub mod page_fault;
pub mod paging;

pub use frame::{Frame, FrameArena, FrameData};
pub use page_fault::{PageFaultResult, handle_cow_fault, resolve_cow};
pub use paging::{COW_FLAG, PageTable, Pte};
