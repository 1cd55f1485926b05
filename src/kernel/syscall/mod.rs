// src/kernel/syscall/mod.rs
//! System call implementation module
//!
//! This module provides the kernel-side implementations of the system calls
//! and the dispatch routine that routes a trap frame to its handler.
//!
//! # System Call Mechanism
//!
//! 1. The trap entry saves user state into a [`TrapFrame`]
//! 2. [`dispatch()`] decodes the number (RAX) and arguments (RDI, RSI, RDX, RCX, R8)
//! 3. The handler runs to completion; nothing here blocks
//! 4. The result is written back to RAX and the process is made runnable,
//!    unless the handler terminated it
//!
//! # Error Handling
//!
//! All system calls return [`SyscallResult`] (i64):
//!
//! - **Positive or zero**: Success (a count or an ID)
//! - **Negative**: Error code (Linux-compatible)
//!
//! Kernel invariant violations (a trap from a process that does not exist,
//! an unsupported descriptor) panic instead.

use core::cmp::min;
use x86_64::VirtAddr;

use crate::arch::x86_64::trap_frame::TrapFrame;
use crate::config::{PAGE_SIZE, USER_TEXT_ATTR};
use crate::kernel::driver::console::{Console, TextAttr};
use crate::kernel::mm::{Frame, FrameArena};
use crate::kernel::process::{Process, ProcessId, ProcessState, ProcessTable, sys_fork};
use crate::kernel::scheduler::RunQueue;

#[cfg(test)]
mod tests;

// ============================================================================
// Error Codes
// ============================================================================

/// System call result type
///
/// Positive or zero values indicate success, negative values are error codes.
pub type SyscallResult = i64;

/// Bad address
pub const EFAULT: SyscallResult = -14;
/// Function not implemented
pub const ENOSYS: SyscallResult = -38;

/// Standard output
pub const STDOUT_FD: u64 = 1;
/// Standard error
pub const STDERR_FD: u64 = 2;

// ============================================================================
// Syscall Numbers
// ============================================================================

/// Supported system calls, numbered as on Linux x86-64
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// `write(fd, buf, count)`
    Write = 1,
    /// `getpid()`
    GetPid = 39,
    /// `fork()`
    Fork = 57,
    /// `exit(status)`
    Exit = 60,
}

impl Syscall {
    /// Decode a syscall number
    #[must_use]
    pub const fn from_number(number: u64) -> Option<Self> {
        match number {
            1 => Some(Self::Write),
            39 => Some(Self::GetPid),
            57 => Some(Self::Fork),
            60 => Some(Self::Exit),
            _ => None,
        }
    }

    /// The raw syscall number
    #[must_use]
    pub const fn number(self) -> u64 {
        self as u64
    }
}

// ============================================================================
// System Call Implementations
// ============================================================================

/// sys_write - Write bytes from user memory to the console
///
/// # Arguments
/// * `fd` - File descriptor (1 = stdout, 2 = stderr)
/// * `buf` - User virtual address of the data
/// * `count` - Number of bytes
///
/// # Returns
/// * Success: `count`
/// * Error: [`EFAULT`] if any byte of the buffer is not mapped user-accessible
///
/// # Panics
/// Any other descriptor is unimplemented.
pub fn sys_write<C>(
    process: &Process,
    frames: &FrameArena,
    console: &mut C,
    fd: u64,
    buf: u64,
    count: u64,
) -> SyscallResult
where
    C: Console + ?Sized,
{
    if count == 0 {
        return 0;
    }
    if !process.table().is_mapped(buf, count) {
        log::warn!(
            "[SYSCALL] sys_write: invalid buffer at {:#x}, len={} (PID={})",
            buf,
            count,
            process.pid()
        );
        return EFAULT;
    }
    if fd != STDOUT_FD && fd != STDERR_FD {
        panic!("[SYSCALL] sys_write: no imp for fd {}", fd);
    }

    let attr = TextAttr::new(USER_TEXT_ATTR);
    let mut done = 0;
    while done < count {
        let va = buf + done;
        let offset = va % PAGE_SIZE;
        let len = min(PAGE_SIZE - offset, count - done);

        let Some(pa) = VirtAddr::try_new(va)
            .ok()
            .and_then(|va| process.table().translate(va))
        else {
            panic!("[SYSCALL] sys_write: {:#x} vanished after validation", va);
        };
        let start = offset as usize;
        let end = start + len as usize;
        let copied = frames.with_frame(Frame::containing_address(pa), |page| {
            for &byte in &page[start..end] {
                console.put_char(byte, attr);
            }
        });
        if copied.is_none() {
            panic!("[SYSCALL] sys_write: user page {:#x} has no backing frame", pa.as_u64());
        }

        done += len;
    }
    count as SyscallResult
}

/// sys_getpid - Get the caller's process ID
pub fn sys_getpid(process: &Process) -> SyscallResult {
    process.pid().as_u64() as SyscallResult
}

/// sys_exit - Terminate the calling process
///
/// The process is marked terminated; the dispatcher reaps it instead of
/// resuming it, so the return value is never seen by user space.
pub fn sys_exit(process: &mut Process, status: u64) -> SyscallResult {
    let status = status as i64;
    log::info!("{} exited with status {}", process.name(), status);
    process.terminate(status);
    0
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Dispatch the system call held in `tf` on behalf of `pid`
///
/// Unknown numbers yield [`ENOSYS`] without running any handler. The result
/// is written to RAX and the process is made runnable with `tf`, unless the
/// handler terminated it: then nothing is written back and the process is
/// reaped.
///
/// # Panics
/// Panics if `pid` is not a live process.
pub fn dispatch<C, S>(
    processes: &mut ProcessTable,
    frames: &FrameArena,
    console: &mut C,
    run_queue: &mut S,
    pid: ProcessId,
    tf: &mut TrapFrame,
) where
    C: Console + ?Sized,
    S: RunQueue + ?Sized,
{
    process_mut(processes, pid).set_state(ProcessState::Running);

    let number = tf.syscall_number();
    let [arg1, arg2, arg3, _arg4, _arg5] = tf.args();

    #[cfg(feature = "syscall_trace")]
    log::trace!(
        "[SYSCALL-ENTRY] pid={} num={}, args=({:#x}, {:#x}, {:#x}, {:#x}, {:#x})",
        pid,
        number,
        arg1,
        arg2,
        arg3,
        _arg4,
        _arg5
    );

    let result = match Syscall::from_number(number) {
        Some(Syscall::Write) => {
            sys_write(process_mut(processes, pid), frames, console, arg1, arg2, arg3)
        }
        Some(Syscall::GetPid) => sys_getpid(process_mut(processes, pid)),
        Some(Syscall::Fork) => {
            sys_fork(processes, frames, run_queue, pid, tf).as_u64() as SyscallResult
        }
        Some(Syscall::Exit) => sys_exit(process_mut(processes, pid), arg1),
        None => {
            log::debug!("[SYSCALL] Invalid syscall number: {}", number);
            ENOSYS
        }
    };

    #[cfg(feature = "syscall_trace")]
    log::trace!("[SYSCALL-RESULT] pid={} num={} returned {}", pid, number, result);

    let process = process_mut(processes, pid);
    if process.is_terminated() {
        processes.reap(pid, frames);
        run_queue.remove(pid);
        return;
    }

    process.set_state(ProcessState::Ready);
    tf.set_return(result);
    run_queue.make_runnable(pid, Some(&*tf));
}

fn process_mut(processes: &mut ProcessTable, pid: ProcessId) -> &mut Process {
    match processes.get_mut(pid) {
        Some(process) => process,
        None => panic!("[SYSCALL] trap from unknown process PID={}", pid),
    }
}
