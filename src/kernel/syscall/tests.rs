//! System call tests
//!
//! These tests drive the dispatcher with hand-built trap frames and verify
//! the register write-back, the console output and the run queue.

use super::*;
use crate::arch::x86_64::trap_frame::{Reg, TF_SIZE};
use crate::kernel::driver::console::RecordingConsole;
use crate::kernel::process::PageUse;
use crate::kernel::scheduler::FifoRunQueue;
use alloc::string::ToString;
use x86_64::structures::paging::PageTableFlags;

const BUF: u64 = 0xf100_0000;

struct Harness {
    processes: ProcessTable,
    frames: FrameArena,
    console: RecordingConsole,
    rq: FifoRunQueue,
    pid: ProcessId,
}

impl Harness {
    /// One process named "init" with two user pages at `BUF` filled with `fill`.
    fn new(fill: &[u8]) -> Self {
        let frames = FrameArena::new(16);
        let mut processes = ProcessTable::new();
        let mut p = processes.create("init".to_string());
        for i in 0..2u64 {
            let frame = p.alloc_page(&frames, PageUse::Segment).unwrap();
            let start = (i * PAGE_SIZE) as usize;
            frames.with_frame_mut(frame, |page| {
                for (j, byte) in page.iter_mut().enumerate() {
                    *byte = fill.get(start + j).copied().unwrap_or(0);
                }
            });
            p.page_insert(
                &frames,
                VirtAddr::new(BUF + i * PAGE_SIZE),
                frame,
                PageTableFlags::USER_ACCESSIBLE | PageTableFlags::WRITABLE,
                true,
            )
            .unwrap();
        }
        let pid = processes.insert(p);
        Self {
            processes,
            frames,
            console: RecordingConsole::new(),
            rq: FifoRunQueue::new(),
            pid,
        }
    }

    fn call(&mut self, number: u64, args: [u64; 3]) -> TrapFrame {
        let mut tf = TrapFrame::zeroed();
        tf.set(Reg::Rax, number);
        tf.set(Reg::Rdi, args[0]);
        tf.set(Reg::Rsi, args[1]);
        tf.set(Reg::Rdx, args[2]);
        self.dispatch(&mut tf);
        tf
    }

    fn dispatch(&mut self, tf: &mut TrapFrame) {
        dispatch(
            &mut self.processes,
            &self.frames,
            &mut self.console,
            &mut self.rq,
            self.pid,
            tf,
        );
    }
}

/// A frame with a distinct value in every slot.
fn patterned_frame(number: u64, args: [u64; 3]) -> TrapFrame {
    let mut words = [0u64; TF_SIZE];
    for (i, word) in words.iter_mut().enumerate() {
        *word = 0x5a5a_0000 + i as u64;
    }
    let mut tf = TrapFrame::from(words);
    tf.set(Reg::Rax, number);
    tf.set(Reg::Rdi, args[0]);
    tf.set(Reg::Rsi, args[1]);
    tf.set(Reg::Rdx, args[2]);
    tf
}

/// Slots that differ between two frames.
fn changed_slots(before: &TrapFrame, after: &TrapFrame) -> alloc::vec::Vec<usize> {
    (0..TF_SIZE)
        .filter(|&i| before.as_words()[i] != after.as_words()[i])
        .collect()
}

/// Test sys_write emits exactly the bytes requested
#[test]
fn test_sys_write_stdout() {
    let mut h = Harness::new(b"hi\n");
    let tf = h.call(1, [1, BUF, 3]);
    assert_eq!(tf.return_value(), 3);
    assert_eq!(h.console.text(), "hi\n");
    assert!(h.console.cells().iter().all(|&(_, attr)| attr == TextAttr::new(0x17)));
    assert!(h.rq.is_queued(h.pid));
}

/// Test sys_write across a page boundary
#[test]
fn test_sys_write_crosses_pages() {
    let data: alloc::vec::Vec<u8> = (0..2 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    let mut h = Harness::new(&data);
    let start = PAGE_SIZE - 5;
    let tf = h.call(1, [2, BUF + start, 10]);
    assert_eq!(tf.return_value(), 10);
    assert_eq!(h.console.bytes(), &data[start as usize..start as usize + 10]);
}

/// Test sys_write with zero length
#[test]
fn test_sys_write_zero_length() {
    let mut h = Harness::new(b"x");
    let tf = h.call(1, [1, 0, 0]);
    assert_eq!(tf.return_value(), 0);
    assert!(h.console.cells().is_empty());
}

/// Test sys_write with unmapped buffer
#[test]
fn test_sys_write_unmapped_buffer() {
    let mut h = Harness::new(b"abc");
    // Last byte falls on the third, unmapped page.
    let tf = h.call(1, [1, BUF + PAGE_SIZE, PAGE_SIZE + 1]);
    assert_eq!(tf.return_value(), EFAULT);
    assert!(h.console.cells().is_empty());
}

/// Test sys_write with a range that wraps the address space
#[test]
fn test_sys_write_overflowing_range() {
    let mut h = Harness::new(b"abc");
    let tf = h.call(1, [1, BUF, u64::MAX]);
    assert_eq!(tf.return_value(), EFAULT);
    assert!(h.console.cells().is_empty());
}

/// Test sys_write to a descriptor other than stdout/stderr
#[test]
#[should_panic(expected = "no imp")]
fn test_sys_write_unsupported_fd() {
    let mut h = Harness::new(b"abc");
    h.call(1, [3, BUF, 3]);
}

/// Test sys_getpid
#[test]
fn test_sys_getpid() {
    let mut h = Harness::new(b"");
    let tf = h.call(39, [0, 0, 0]);
    assert_eq!(tf.return_value(), h.pid.as_u64() as i64);
}

/// Test unknown syscall numbers
#[test]
fn test_unknown_syscall() {
    let mut h = Harness::new(b"");
    let tf = h.call(9999, [1, BUF, 3]);
    assert_eq!(tf.return_value(), ENOSYS);
    assert!(h.console.cells().is_empty());
    assert!(h.rq.is_queued(h.pid));
}

/// Test sys_exit reaps without writing back
#[test]
fn test_sys_exit() {
    let mut h = Harness::new(b"");
    let tf = h.call(60, [7, 0, 0]);
    assert_eq!(tf.get(Reg::Rax), 60);
    assert!(!h.processes.contains(h.pid));
    assert!(!h.rq.is_queued(h.pid));
    assert_eq!(h.frames.allocated(), 0);
}

/// Test sys_fork returns the child PID to the parent
#[test]
fn test_sys_fork_dispatch() {
    let mut h = Harness::new(b"");
    let tf = h.call(57, [0, 0, 0]);
    let child = ProcessId::new(tf.return_value() as u64);
    assert_ne!(child, h.pid);
    assert!(h.processes.contains(child));

    let (first, child_tf) = h.rq.schedule().unwrap();
    assert_eq!(first, child);
    assert_eq!(child_tf.return_value(), 0);
    let (second, parent_tf) = h.rq.schedule().unwrap();
    assert_eq!(second, h.pid);
    assert_eq!(parent_tf.return_value(), child.as_u64() as i64);
}

/// Test dispatch for a process that does not exist
#[test]
#[should_panic(expected = "unknown process")]
fn test_dispatch_unknown_process() {
    let mut h = Harness::new(b"");
    h.pid = ProcessId::new(99);
    h.call(39, [0, 0, 0]);
}

#[test]
fn test_syscall_numbers() {
    for call in [Syscall::Write, Syscall::GetPid, Syscall::Fork, Syscall::Exit] {
        assert_eq!(Syscall::from_number(call.number()), Some(call));
    }
    assert_eq!(Syscall::from_number(0), None);
}

/// Test dispatch writes back RAX and nothing else
#[test]
fn test_dispatch_only_writes_return_register() {
    let mut h = Harness::new(b"hi\n");
    for (number, args) in [(9999, [1, BUF, 3]), (39, [0, 0, 0]), (1, [1, BUF, 3])] {
        let before = patterned_frame(number, args);
        let mut tf = before;
        h.dispatch(&mut tf);
        assert_eq!(changed_slots(&before, &tf), [Reg::Rax as usize], "syscall {}", number);
    }
    assert_eq!(h.console.text(), "hi\n");
}

/// Test an unknown syscall leaves the process untouched
#[test]
fn test_unknown_syscall_leaves_process_unchanged() {
    let mut h = Harness::new(b"abc");
    let snapshot = |h: &Harness| {
        let p = h.processes.get(h.pid).unwrap();
        let pages: alloc::vec::Vec<_> = p.tracked_pages().map(|(f, r)| (f, *r)).collect();
        (p.table().mappings(), pages, p.state())
    };
    let before = snapshot(&h);
    let allocated = h.frames.allocated();

    let tf = h.call(777, [1, BUF, 3]);
    assert_eq!(tf.return_value(), ENOSYS);
    assert_eq!(snapshot(&h), before);
    assert_eq!(h.frames.allocated(), allocated);
}

/// Test the recording console across consecutive writes
#[test]
fn test_sys_write_consecutive_calls() {
    let mut h = Harness::new(b"abcdef");
    h.call(1, [1, BUF, 3]);
    assert_eq!(h.console.text(), "abc");
    h.console.clear();
    h.call(1, [2, BUF + 3, 3]);
    assert_eq!(h.console.text(), "def");
}
