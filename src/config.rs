// src/config.rs

//! Kernel constants and configuration values
//!
//! Address-space layout and sizing used by the loader, the fork engine
//! and the syscall layer.

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Lowest virtual address the ELF loader will populate.
///
/// Program headers below this address are skipped.
pub const USERMIN: u64 = 0xf100_0000;

/// The bootstrap user stack occupies the page just below this address.
pub const USER_STACK_VA: u64 = 0xf400_0000;

/// Text attribute for bytes written by user processes (light grey on blue).
pub const USER_TEXT_ATTR: u8 = 0x17;

/// Physical address of the first frame handed out by the frame arena.
pub const FRAME_BASE: u64 = 0x0010_0000;

/// Default capacity of the frame arena, in frames.
pub const DEFAULT_FRAME_LIMIT: usize = 1024;

/// Suffix appended to the name of a bootstrapped process.
pub const SPAWN_NAME_SUFFIX: &str = "test";

/// Round `addr` down to its page boundary.
#[inline]
#[must_use]
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

/// Round `addr` up to the next page boundary.
///
/// Returns `None` if the result does not fit in 64 bits.
#[inline]
#[must_use]
pub const fn page_round_up(addr: u64) -> Option<u64> {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(page_round_down(v)),
        None => None,
    }
}
