//! User-space page fault handling
//!
//! The only fault the kernel repairs is a write to a copy-on-write page:
//! the faulting process gets a private, writable copy and the other sharers
//! keep the original.

use x86_64::VirtAddr;
use x86_64::structures::idt::PageFaultErrorCode;
use x86_64::structures::paging::PageTableFlags;

use crate::config::page_round_down;
use crate::errors::PageFaultError;
use crate::kernel::mm::paging::COW_FLAG;
use crate::kernel::mm::{FrameArena, Pte};
use crate::kernel::process::{PageUse, Process};
use crate::kernel::scheduler::RunQueue;

/// Result type for page fault handling
pub type PageFaultResult<T> = Result<T, PageFaultError>;

/// Classify a user page fault and resolve it if it is a COW write.
///
/// # Errors
///
/// * [`PageFaultError::NotMapped`] - no present user mapping at `fault_addr`
/// * [`PageFaultError::AccessViolation`] - not a write, or the page is not COW
pub fn handle_cow_fault<S>(
    process: &mut Process,
    frames: &FrameArena,
    run_queue: &mut S,
    fault_addr: VirtAddr,
    error_code: PageFaultErrorCode,
) -> PageFaultResult<()>
where
    S: RunQueue + ?Sized,
{
    let pte = match process.table().lookup(fault_addr) {
        Some(pte) if pte.is_present() && pte.is_user() => pte,
        _ => {
            log::warn!(
                "[PageFault] PID={} no user mapping at {:#x}",
                process.pid(),
                fault_addr.as_u64()
            );
            return Err(PageFaultError::NotMapped);
        }
    };

    // CoW only applies to write violations
    if !error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE) || !pte.is_cow() {
        log::warn!(
            "[PageFault] PID={} access violation at {:#x} ({:?}, flags {:?})",
            process.pid(),
            fault_addr.as_u64(),
            error_code,
            pte.flags()
        );
        return Err(PageFaultError::AccessViolation);
    }

    resolve_cow(process, frames, run_queue, pte, fault_addr)
}

/// Give `process` a private writable copy of the COW page `pte` maps.
///
/// The shared page is released from this process only; any other sharer
/// keeps its mapping and its reference.
///
/// # Panics
///
/// Panics if no physical page is available for the copy.
pub fn resolve_cow<S>(
    process: &mut Process,
    frames: &FrameArena,
    run_queue: &mut S,
    pte: Pte,
    fault_addr: VirtAddr,
) -> PageFaultResult<()>
where
    S: RunQueue + ?Sized,
{
    let va = VirtAddr::new(page_round_down(fault_addr.as_u64()));
    let shared = pte.frame();

    log::debug!(
        "[PageFault] Handling CoW for page {:#x} (PID={})",
        va.as_u64(),
        process.pid()
    );

    let Some(private) = process.alloc_page(frames, PageUse::Private) else {
        panic!(
            "[PageFault] out of memory copying COW page {:#x} for PID={}",
            va.as_u64(),
            process.pid()
        );
    };
    if !frames.copy_frame(shared, private) {
        panic!(
            "[PageFault] COW source {:#x} is not a live frame",
            shared.start_address().as_u64()
        );
    }

    // Map new frame with WRITABLE and NO CoW flag
    let flags = (pte.flags() - COW_FLAG) | PageTableFlags::WRITABLE;
    process.page_insert(frames, va, private, flags, false)?;
    // The shared page may still be mapped at another address of this process.
    if !process.maps_user_frame(shared) {
        process.release_page(frames, shared);
    }

    run_queue.make_runnable(process.pid(), None);

    log::debug!("[PageFault] CoW complete for page {:#x}", va.as_u64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::process::ProcessId;
    use crate::kernel::scheduler::FifoRunQueue;
    use alloc::string::ToString;

    const VA: u64 = 0xf400_0000;

    fn cow_flags() -> PageTableFlags {
        PageTableFlags::USER_ACCESSIBLE | COW_FLAG
    }

    fn setup(flags: PageTableFlags) -> (FrameArena, Process) {
        let frames = FrameArena::new(8);
        let mut process = Process::new(ProcessId::new(1), "p".to_string());
        let frame = process.alloc_page(&frames, PageUse::Stack).unwrap();
        frames.with_frame_mut(frame, |d| d.fill(0xAA));
        process
            .page_insert(&frames, VirtAddr::new(VA), frame, flags, true)
            .unwrap();
        (frames, process)
    }

    #[test]
    fn test_write_to_cow_page_privatizes() {
        let (frames, mut process) = setup(cow_flags());
        let shared = process.table().lookup(VirtAddr::new(VA)).unwrap().frame();
        frames.add_reference(shared); // a second sharer
        let mut rq = FifoRunQueue::new();

        handle_cow_fault(
            &mut process,
            &frames,
            &mut rq,
            VirtAddr::new(VA + 0x10),
            PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::PROTECTION_VIOLATION,
        )
        .unwrap();

        let pte = process.table().lookup(VirtAddr::new(VA)).unwrap();
        assert_ne!(pte.frame(), shared);
        assert!(pte.is_writable() && !pte.is_cow() && pte.is_user());
        assert_eq!(frames.with_frame(pte.frame(), |d| d.iter().all(|&b| b == 0xAA)), Some(true));
        assert!(process.page_record(shared).is_none());
        assert_eq!(frames.ref_count(shared), 1);
        assert!(rq.is_queued(ProcessId::new(1)));
    }

    #[test]
    fn test_privatizing_one_alias_keeps_the_other() {
        let (frames, mut process) = setup(cow_flags());
        let shared = process.table().lookup(VirtAddr::new(VA)).unwrap().frame();
        frames.add_reference(shared);
        *process.table_mut().entry(VirtAddr::new(VA + 0x1000)) =
            Pte::new(shared, PageTableFlags::PRESENT | cow_flags());
        let mut rq = FifoRunQueue::new();

        handle_cow_fault(
            &mut process,
            &frames,
            &mut rq,
            VirtAddr::new(VA),
            PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::PROTECTION_VIOLATION,
        )
        .unwrap();

        let alias = process.table().lookup(VirtAddr::new(VA + 0x1000)).unwrap();
        assert_eq!(alias.frame(), shared);
        assert!(alias.is_cow());
        assert!(process.page_record(shared).is_some());
        assert_eq!(frames.ref_count(shared), 2);
        assert!(process.tracks_all_user_pages());
    }

    #[test]
    fn test_read_fault_is_access_violation() {
        let (frames, mut process) = setup(cow_flags());
        let mut rq = FifoRunQueue::new();
        let err = handle_cow_fault(
            &mut process,
            &frames,
            &mut rq,
            VirtAddr::new(VA),
            PageFaultErrorCode::PROTECTION_VIOLATION,
        );
        assert_eq!(err, Err(PageFaultError::AccessViolation));
        assert!(rq.is_empty());
    }

    #[test]
    fn test_write_to_plain_read_only_page_is_access_violation() {
        let (frames, mut process) = setup(PageTableFlags::USER_ACCESSIBLE);
        let mut rq = FifoRunQueue::new();
        let err = handle_cow_fault(
            &mut process,
            &frames,
            &mut rq,
            VirtAddr::new(VA),
            PageFaultErrorCode::CAUSED_BY_WRITE,
        );
        assert_eq!(err, Err(PageFaultError::AccessViolation));
    }

    #[test]
    fn test_unmapped_address() {
        let (frames, mut process) = setup(cow_flags());
        let mut rq = FifoRunQueue::new();
        let err = handle_cow_fault(
            &mut process,
            &frames,
            &mut rq,
            VirtAddr::new(VA + 0x1000),
            PageFaultErrorCode::CAUSED_BY_WRITE,
        );
        assert_eq!(err, Err(PageFaultError::NotMapped));
    }

    #[test]
    #[should_panic(expected = "out of memory copying COW page")]
    fn test_exhaustion_panics() {
        let frames = FrameArena::new(1);
        let mut process = Process::new(ProcessId::new(1), "p".to_string());
        let frame = process.alloc_page(&frames, PageUse::Stack).unwrap();
        process
            .page_insert(&frames, VirtAddr::new(VA), frame, cow_flags(), true)
            .unwrap();
        let pte = process.table().lookup(VirtAddr::new(VA)).unwrap();
        let mut rq = FifoRunQueue::new();
        let _ = resolve_cow(&mut process, &frames, &mut rq, pte, VirtAddr::new(VA));
    }
}
