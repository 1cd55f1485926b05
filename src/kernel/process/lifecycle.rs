//! Process lifecycle management
//!
//! Bootstrapping a process from an ELF image. Termination lives in the
//! syscall layer (`exit`) and in [`ProcessTable::reap`].

use alloc::format;
use x86_64::VirtAddr;
use x86_64::structures::paging::PageTableFlags;

use super::elf_loader::{self, ElfImage};
use super::{PageUse, Process, ProcessId, ProcessTable};
use crate::arch::x86_64::trap_frame::TrapFrame;
use crate::config::{PAGE_SIZE, SPAWN_NAME_SUFFIX, USER_STACK_VA};
use crate::kernel::mm::{FrameArena, PageTable};
use crate::kernel::scheduler::RunQueue;

/// Create a process from `image` and queue it.
///
/// The new address space starts as a copy of `kernel_space`, gets one
/// writable stack page just below [`USER_STACK_VA`], and then the image's
/// loadable segments. The process starts at `e_entry` with interrupts
/// enabled and its stack pointer one word below the stack top.
///
/// # Panics
///
/// Panics on a malformed image or when physical memory runs out.
pub fn spawn<S>(
    processes: &mut ProcessTable,
    frames: &FrameArena,
    run_queue: &mut S,
    kernel_space: &PageTable,
    name: &str,
    image: &ElfImage<'_>,
) -> ProcessId
where
    S: RunQueue + ?Sized,
{
    let pid = processes.allocate_pid();
    let mut process = Process::with_table(
        pid,
        format!("{}{}", name, SPAWN_NAME_SUFFIX),
        kernel_space.clone(),
    );

    // 1. User stack
    let stack_va = VirtAddr::new(USER_STACK_VA - PAGE_SIZE);
    let Some(stack) = process.alloc_page(frames, PageUse::Stack) else {
        panic!("[Process] out of memory allocating stack for {}", process.name());
    };
    if let Err(e) = process.page_insert(
        frames,
        stack_va,
        stack,
        PageTableFlags::USER_ACCESSIBLE | PageTableFlags::WRITABLE,
        true,
    ) {
        panic!("[Process] cannot map stack for {}: {}", process.name(), e);
    }

    // 2. Program image
    image.log_headers();
    elf_loader::load(&mut process, image, frames);
    let entry = match image.entry() {
        Ok(entry) => entry,
        Err(e) => panic!("[Process] no entry point for {}: {}", process.name(), e),
    };

    // 3. Initial register state
    let tf = TrapFrame::user_entry(entry, USER_STACK_VA - 8);

    log::info!(
        "[Process] Spawned PID={} ({}) entry={:#x}",
        pid,
        process.name(),
        entry
    );
    processes.insert(process);
    run_queue.enqueue(pid, tf);
    pid
}
