// src/arch/x86_64/trap_frame.rs
//! Trap frame layout
//!
//! The trap entry stubs save machine state as a flat array of machine words:
//! the general-purpose registers first, then the trap number, the hardware
//! error code and the interrupt-return frame pushed by the CPU.
//!
//! ```text
//!  0 FSBASE   4 R12   8 R8    12 RDX   16 TRAP    20 RFLAGS
//!  1 R15      5 R11   9 RBP   13 RCX   17 ERROR   21 RSP
//!  2 R14      6 R10  10 RSI   14 RBX   18 RIP     22 SS
//!  3 R13      7 R9   11 RDI   15 RAX   19 CS
//! ```
//!
//! Keep this layout in sync with the save/restore assembly. Code outside this
//! module never indexes the array directly; it names a [`Reg`] slot.

use core::fmt;

/// Number of general-purpose register slots at the start of the frame.
pub const TF_REGS: usize = 16;

/// Total number of machine words in a trap frame.
pub const TF_SIZE: usize = 23;

/// RFLAGS interrupt-enable bit.
pub const RFLAGS_IF: u64 = 1 << 9;

/// GDT index of the user code segment.
const USER_CODE_SEGMENT: u64 = 4;
/// GDT index of the user data segment.
const USER_DATA_SEGMENT: u64 = 5;
/// Requested privilege level for user selectors.
const RPL_USER: u64 = 3;

/// A named slot of the trap frame.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    /// FS segment base
    FsBase = 0,
    /// r15
    R15 = 1,
    /// r14
    R14 = 2,
    /// r13
    R13 = 3,
    /// r12
    R12 = 4,
    /// r11
    R11 = 5,
    /// r10
    R10 = 6,
    /// r9
    R9 = 7,
    /// r8 (fifth syscall argument)
    R8 = 8,
    /// rbp
    Rbp = 9,
    /// rsi (second syscall argument)
    Rsi = 10,
    /// rdi (first syscall argument)
    Rdi = 11,
    /// rdx (third syscall argument)
    Rdx = 12,
    /// rcx (fourth syscall argument)
    Rcx = 13,
    /// rbx
    Rbx = 14,
    /// rax (syscall number on entry, return value on exit)
    Rax = 15,
    /// Trap vector number
    Trap = TF_REGS,
    /// Hardware error code
    Error = TF_REGS + 1,
    /// Instruction pointer
    Rip = TF_REGS + 2,
    /// Code segment selector
    Cs = TF_REGS + 3,
    /// Flags register
    Rflags = TF_REGS + 4,
    /// Stack pointer
    Rsp = TF_REGS + 5,
    /// Stack segment selector
    Ss = TF_REGS + 6,
}

impl Reg {
    /// Slots carrying syscall arguments, in argument order.
    pub const SYSCALL_ARGS: [Reg; 5] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8];

    /// Slot holding the syscall number on entry.
    pub const SYSCALL_NUMBER: Reg = Reg::Rax;

    /// Slot receiving the syscall return value.
    pub const RETURN_VALUE: Reg = Reg::Rax;

    #[inline]
    const fn offset(self) -> usize {
        self as usize
    }
}

/// Register snapshot taken on kernel entry.
///
/// Passed by `&mut` to exactly one handler at a time; the resume path
/// restores the machine state from whatever the handler left in it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame([u64; TF_SIZE]);

impl TrapFrame {
    /// An all-zero frame.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self([0; TF_SIZE])
    }

    /// Initial frame for a process entering user mode for the first time.
    ///
    /// Interrupts are enabled and the user code/data selectors carry RPL 3.
    #[must_use]
    pub fn user_entry(rip: u64, rsp: u64) -> Self {
        let mut tf = Self::zeroed();
        tf.set(Reg::Rip, rip);
        tf.set(Reg::Rsp, rsp);
        tf.set(Reg::Rflags, RFLAGS_IF);
        tf.set(Reg::Cs, (USER_CODE_SEGMENT << 3) | RPL_USER);
        tf.set(Reg::Ss, (USER_DATA_SEGMENT << 3) | RPL_USER);
        tf
    }

    /// Read a slot.
    #[inline]
    #[must_use]
    pub const fn get(&self, reg: Reg) -> u64 {
        self.0[reg.offset()]
    }

    /// Write a slot.
    #[inline]
    pub fn set(&mut self, reg: Reg, value: u64) {
        self.0[reg.offset()] = value;
    }

    /// Syscall number requested by user space.
    #[inline]
    #[must_use]
    pub const fn syscall_number(&self) -> u64 {
        self.get(Reg::SYSCALL_NUMBER)
    }

    /// The five syscall argument registers, in order.
    #[must_use]
    pub fn args(&self) -> [u64; 5] {
        Reg::SYSCALL_ARGS.map(|reg| self.get(reg))
    }

    /// Store a syscall result; negative values are errno codes.
    #[inline]
    pub fn set_return(&mut self, value: i64) {
        self.set(Reg::RETURN_VALUE, value as u64);
    }

    /// The value user space will see in the return register.
    #[inline]
    #[must_use]
    pub const fn return_value(&self) -> i64 {
        self.get(Reg::RETURN_VALUE) as i64
    }

    /// Raw words, in layout order.
    #[must_use]
    pub const fn as_words(&self) -> &[u64; TF_SIZE] {
        &self.0
    }
}

impl Default for TrapFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl From<[u64; TF_SIZE]> for TrapFrame {
    fn from(words: [u64; TF_SIZE]) -> Self {
        Self(words)
    }
}

impl fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapFrame")
            .field("rax", &format_args!("{:#x}", self.get(Reg::Rax)))
            .field("rdi", &format_args!("{:#x}", self.get(Reg::Rdi)))
            .field("rsi", &format_args!("{:#x}", self.get(Reg::Rsi)))
            .field("rdx", &format_args!("{:#x}", self.get(Reg::Rdx)))
            .field("trap", &self.get(Reg::Trap))
            .field("rip", &format_args!("{:#x}", self.get(Reg::Rip)))
            .field("rsp", &format_args!("{:#x}", self.get(Reg::Rsp)))
            .field("rflags", &format_args!("{:#x}", self.get(Reg::Rflags)))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(Reg::R8 as usize, 8);
        assert_eq!(Reg::Rsi as usize, 10);
        assert_eq!(Reg::Rdi as usize, 11);
        assert_eq!(Reg::Rax as usize, 15);
        assert_eq!(Reg::Trap as usize, TF_REGS);
        assert_eq!(Reg::Rip as usize, TF_REGS + 2);
        assert_eq!(Reg::Rsp as usize, TF_REGS + 5);
        assert_eq!(Reg::Ss as usize, TF_SIZE - 1);
        assert_eq!(core::mem::size_of::<TrapFrame>(), TF_SIZE * 8);
    }

    #[test]
    fn test_args_follow_argument_registers() {
        let mut tf = TrapFrame::zeroed();
        tf.set(Reg::Rdi, 1);
        tf.set(Reg::Rsi, 2);
        tf.set(Reg::Rdx, 3);
        tf.set(Reg::Rcx, 4);
        tf.set(Reg::R8, 5);
        assert_eq!(tf.args(), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_negative_return_round_trips() {
        let mut tf = TrapFrame::zeroed();
        tf.set_return(-38);
        assert_eq!(tf.return_value(), -38);
        assert_eq!(tf.get(Reg::Rax), (-38i64) as u64);
    }

    #[test]
    fn test_user_entry_selectors() {
        let tf = TrapFrame::user_entry(0xf100_0000, 0xf3ff_fff8);
        assert_eq!(tf.get(Reg::Cs), 0x23);
        assert_eq!(tf.get(Reg::Ss), 0x2b);
        assert_eq!(tf.get(Reg::Rflags), RFLAGS_IF);
        assert_eq!(tf.get(Reg::Rip), 0xf100_0000);
        assert_eq!(tf.get(Reg::Rsp), 0xf3ff_fff8);
    }
}
