//! Fork with copy-on-write address spaces
//!
//! The child gets its own table root but no copies of user memory. Every
//! writable user page becomes read-only + COW in both tables and is shared
//! until one side writes to it (see `mm::page_fault`).

use alloc::format;
use alloc::vec::Vec;
use x86_64::structures::paging::PageTableFlags;

use super::{Process, ProcessId, ProcessTable};
use crate::arch::x86_64::trap_frame::{Reg, TrapFrame};
use crate::kernel::mm::{COW_FLAG, FrameArena, Pte};
use crate::kernel::scheduler::RunQueue;

/// Duplicate `parent_pid` and queue the child.
///
/// The child resumes from `tf` with a return value of 0; the returned PID is
/// what the parent sees. The parent's TLB is not flushed here; the trap
/// return path owns that.
///
/// # Panics
///
/// Panics if the parent does not exist, or if a user mapping refers to a
/// page the parent does not track.
pub fn sys_fork<S>(
    processes: &mut ProcessTable,
    frames: &FrameArena,
    run_queue: &mut S,
    parent_pid: ProcessId,
    tf: &TrapFrame,
) -> ProcessId
where
    S: RunQueue + ?Sized,
{
    let child_pid = processes.allocate_pid();

    let child = {
        let Some(parent) = processes.get_mut(parent_pid) else {
            panic!("[FORK] no such process: PID={}", parent_pid);
        };

        let mut shared = Vec::new();
        let pages = &parent.pages;
        let table = parent.table.duplicate_with(|va, pte| {
            if !pte.is_user() {
                return (pte, pte);
            }
            let Some(record) = pages.get(&pte.frame()) else {
                panic!(
                    "[FORK] PID={} maps untracked page {:#x} at {:#x}",
                    parent_pid,
                    pte.addr().as_u64(),
                    va.as_u64()
                );
            };
            shared.push((pte.frame(), *record));
            let entry = cow_entry(pte);
            (entry, entry)
        });

        let mut child = Process::with_table(child_pid, format!("{}'s child", parent.name()), table);
        child.set_parent_pid(parent_pid);
        for (frame, record) in shared {
            child.share_page(frames, frame, record);
        }

        log::trace!(
            "[FORK] PID={} -> PID={} sharing {} pages",
            parent_pid,
            child_pid,
            child.pages.len()
        );
        child
    };

    let mut child_tf = *tf;
    child_tf.set(Reg::Rax, 0);
    run_queue.enqueue(child_pid, child_tf);
    processes.insert(child);

    log::info!("[FORK] Created child PID={} of PID={}", child_pid, parent_pid);
    child_pid
}

/// Writable user entries become read-only + COW; read-only ones are shared as is.
fn cow_entry(pte: Pte) -> Pte {
    if !pte.is_writable() {
        return pte;
    }
    let mut entry = pte;
    entry.set_flags((pte.flags() - PageTableFlags::WRITABLE) | COW_FLAG);
    entry
}
