//! Shared helpers for the integration tests

#![allow(dead_code)]

use tiny_os_exec::kernel::driver::RecordingConsole;
use tiny_os_exec::kernel::mm::FrameArena;
use tiny_os_exec::kernel::scheduler::FifoRunQueue;
use tiny_os_exec::{Kernel, Reg, TrapFrame};

pub type TestKernel = Kernel<RecordingConsole, FifoRunQueue>;

pub const PT_LOAD: u32 = 1;
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

/// One program header for [`build_elf`]
pub struct Segment<'a> {
    pub kind: u32,
    pub flags: u32,
    pub vaddr: u64,
    pub bytes: &'a [u8],
    pub memsz: u64,
}

/// Assemble a minimal 64-bit little-endian ELF image
pub fn build_elf(entry: u64, segments: &[Segment<'_>]) -> Vec<u8> {
    let mut image = vec![0u8; EHDR_SIZE + PHDR_SIZE * segments.len()];
    image[0..4].copy_from_slice(b"\x7fELF");
    image[4] = 2; // ELFCLASS64
    image[5] = 1; // little endian
    image[0x18..0x20].copy_from_slice(&entry.to_le_bytes());
    image[0x20..0x28].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
    image[0x36..0x38].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    image[0x38..0x3a].copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (i, seg) in segments.iter().enumerate() {
        let offset = image.len() as u64;
        image.extend_from_slice(seg.bytes);
        let ph = EHDR_SIZE + i * PHDR_SIZE;
        image[ph..ph + 4].copy_from_slice(&seg.kind.to_le_bytes());
        image[ph + 4..ph + 8].copy_from_slice(&seg.flags.to_le_bytes());
        image[ph + 8..ph + 0x10].copy_from_slice(&offset.to_le_bytes());
        image[ph + 0x10..ph + 0x18].copy_from_slice(&seg.vaddr.to_le_bytes());
        image[ph + 0x20..ph + 0x28].copy_from_slice(&(seg.bytes.len() as u64).to_le_bytes());
        image[ph + 0x28..ph + 0x30].copy_from_slice(&seg.memsz.to_le_bytes());
    }
    image
}

pub fn kernel(frame_limit: usize) -> TestKernel {
    Kernel::new(
        FrameArena::new(frame_limit),
        RecordingConsole::new(),
        FifoRunQueue::new(),
    )
}

/// A trap frame requesting syscall `number` with up to three arguments
pub fn syscall_frame(number: u64, args: [u64; 3]) -> TrapFrame {
    let mut tf = TrapFrame::zeroed();
    tf.set(Reg::Rax, number);
    tf.set(Reg::Rdi, args[0]);
    tf.set(Reg::Rsi, args[1]);
    tf.set(Reg::Rdx, args[2]);
    tf
}
