//! Process Scheduler
//!
//! The execution core only ever asks the scheduler to queue a process; it
//! never picks what runs next. [`RunQueue`] is that seam, and
//! [`FifoRunQueue`] is the simple in-order implementation the kernel ships.

use alloc::collections::{BTreeMap, VecDeque};

use crate::arch::x86_64::trap_frame::TrapFrame;
use crate::kernel::process::ProcessId;

/// Scheduler interface consumed by the syscall, fork and fault paths
pub trait RunQueue {
    /// Queue a new process that will start from `tf`.
    fn enqueue(&mut self, pid: ProcessId, tf: TrapFrame);

    /// Mark `pid` runnable again.
    ///
    /// With `Some(tf)` the process resumes from that frame; with `None` it
    /// resumes from whatever frame was last saved for it.
    fn make_runnable(&mut self, pid: ProcessId, tf: Option<&TrapFrame>);

    /// Forget `pid` entirely (it was reaped).
    fn remove(&mut self, pid: ProcessId);
}

/// First-in first-out run queue
#[derive(Debug, Default)]
pub struct FifoRunQueue {
    queue: VecDeque<ProcessId>,
    frames: BTreeMap<ProcessId, TrapFrame>,
}

impl FifoRunQueue {
    /// Create an empty run queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            frames: BTreeMap::new(),
        }
    }

    /// Select next process to run, with the frame it resumes from
    pub fn schedule(&mut self) -> Option<(ProcessId, TrapFrame)> {
        let pid = self.queue.pop_front()?;
        let tf = self.frames.get(&pid).copied().unwrap_or_default();
        Some((pid, tf))
    }

    /// Whether `pid` is waiting to run
    #[must_use]
    pub fn is_queued(&self, pid: ProcessId) -> bool {
        self.queue.contains(&pid)
    }

    /// Last frame saved for `pid`
    #[must_use]
    pub fn saved_frame(&self, pid: ProcessId) -> Option<&TrapFrame> {
        self.frames.get(&pid)
    }

    /// Number of queued processes
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(&mut self, pid: ProcessId) {
        if !self.queue.contains(&pid) {
            self.queue.push_back(pid);
        }
    }
}

impl RunQueue for FifoRunQueue {
    fn enqueue(&mut self, pid: ProcessId, tf: TrapFrame) {
        self.frames.insert(pid, tf);
        self.push(pid);
    }

    fn make_runnable(&mut self, pid: ProcessId, tf: Option<&TrapFrame>) {
        if let Some(tf) = tf {
            self.frames.insert(pid, *tf);
        }
        self.push(pid);
    }

    fn remove(&mut self, pid: ProcessId) {
        self.queue.retain(|&queued| queued != pid);
        self.frames.remove(&pid);
    }
}
