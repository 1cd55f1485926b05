// src/arch/x86_64/tlb.rs
//! TLB maintenance

use x86_64::VirtAddr;

/// Drop the cached translation for `va` on the current core.
///
/// Only meaningful on bare metal; hosted builds have no TLB to flush.
#[inline]
pub fn invalidate(va: VirtAddr) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    x86_64::instructions::tlb::flush(va);

    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    log::trace!("[TLB] invalidate {:#x}", va.as_u64());
}
