// src/kernel/mm/paging.rs
//! Page table model
//!
//! A four-level, 4 KiB-only page table kept in ordinary heap memory. Index
//! math comes from [`VirtAddr`]; entry flags are the `x86_64` crate's
//! [`PageTableFlags`], with bit 9 reserved by the kernel as the COW marker.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use x86_64::structures::paging::{PageTableFlags, PageTableIndex, PhysFrame};
use x86_64::{PhysAddr, VirtAddr};

use crate::config::{PAGE_SIZE, page_round_down};

use super::frame::Frame;

/// Copy-on-Write flag (uses OS-available bit 9)
pub const COW_FLAG: PageTableFlags = PageTableFlags::BIT_9;

const ENTRY_COUNT: usize = 512;
const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

/// A leaf page-table entry: frame address in bits 12..52, flags elsewhere.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(u64);

impl Pte {
    /// Entry mapping `frame` with `flags`.
    #[must_use]
    pub fn new(frame: Frame, flags: PageTableFlags) -> Self {
        Self((frame.start_address().as_u64() & ADDR_MASK) | (flags.bits() & !ADDR_MASK))
    }

    /// The unused entry.
    #[must_use]
    pub const fn unused() -> Self {
        Self(0)
    }

    /// Raw 64-bit value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Physical address field.
    #[must_use]
    pub fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & ADDR_MASK)
    }

    /// Mapped frame.
    #[must_use]
    pub fn frame(self) -> Frame {
        PhysFrame::containing_address(self.addr())
    }

    /// Flag bits.
    #[must_use]
    pub fn flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0 & !ADDR_MASK)
    }

    /// Replace the flags, keeping the address.
    pub fn set_flags(&mut self, flags: PageTableFlags) {
        self.0 = (self.0 & ADDR_MASK) | (flags.bits() & !ADDR_MASK);
    }

    /// PRESENT bit set.
    #[must_use]
    pub fn is_present(self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT)
    }

    /// USER_ACCESSIBLE bit set.
    #[must_use]
    pub fn is_user(self) -> bool {
        self.flags().contains(PageTableFlags::USER_ACCESSIBLE)
    }

    /// WRITABLE bit set.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self.flags().contains(PageTableFlags::WRITABLE)
    }

    /// Marked copy-on-write.
    #[must_use]
    pub fn is_cow(self) -> bool {
        self.flags().contains(COW_FLAG)
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pte")
            .field("addr", &format_args!("{:#x}", self.addr().as_u64()))
            .field("flags", &self.flags())
            .finish()
    }
}

/// A page-table level that can be allocated empty.
trait Level: Clone {
    fn empty() -> Box<Self>;
}

#[derive(Clone)]
struct Leaf([Pte; ENTRY_COUNT]);

impl Level for Leaf {
    fn empty() -> Box<Self> {
        Box::new(Leaf([Pte::unused(); ENTRY_COUNT]))
    }
}

#[derive(Clone)]
struct Node<T: Level> {
    slots: [Option<Box<T>>; ENTRY_COUNT],
}

impl<T: Level> Level for Node<T> {
    fn empty() -> Box<Self> {
        Box::new(Node {
            slots: core::array::from_fn(|_| None),
        })
    }
}

impl<T: Level> Node<T> {
    fn child(&self, index: PageTableIndex) -> Option<&T> {
        self.slots[usize::from(index)].as_deref()
    }

    fn child_mut(&mut self, index: PageTableIndex) -> Option<&mut T> {
        self.slots[usize::from(index)].as_deref_mut()
    }

    fn child_or_create(&mut self, index: PageTableIndex) -> &mut T {
        self.slots[usize::from(index)].get_or_insert_with(T::empty)
    }
}

type Pml4 = Node<Node<Node<Leaf>>>;

fn address_of(p4: usize, p3: usize, p2: usize, p1: usize) -> VirtAddr {
    VirtAddr::new_truncate(
        ((p4 as u64) << 39) | ((p3 as u64) << 30) | ((p2 as u64) << 21) | ((p1 as u64) << 12),
    )
}

/// A page-table root and everything below it.
///
/// Exactly one process owns a given root. Cloning produces an independent
/// table with identical entries (used to seed new address spaces from the
/// kernel template).
#[derive(Clone)]
pub struct PageTable {
    root: Box<Pml4>,
}

impl PageTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self { root: Pml4::empty() }
    }

    /// Locate the leaf entry for `va`, creating intermediate levels if `create`.
    ///
    /// Returns `None` only when an intermediate level is missing and `create`
    /// is false.
    pub fn walk(&mut self, va: VirtAddr, create: bool) -> Option<&mut Pte> {
        if create {
            return Some(self.entry(va));
        }
        let pt = self
            .root
            .child_mut(va.p4_index())?
            .child_mut(va.p3_index())?
            .child_mut(va.p2_index())?;
        Some(&mut pt.0[usize::from(va.p1_index())])
    }

    /// Locate the leaf entry for `va`, allocating intermediate levels.
    pub fn entry(&mut self, va: VirtAddr) -> &mut Pte {
        let pt = self
            .root
            .child_or_create(va.p4_index())
            .child_or_create(va.p3_index())
            .child_or_create(va.p2_index());
        &mut pt.0[usize::from(va.p1_index())]
    }

    /// Read the leaf entry for `va` without allocating.
    #[must_use]
    pub fn lookup(&self, va: VirtAddr) -> Option<Pte> {
        let pt = self
            .root
            .child(va.p4_index())?
            .child(va.p3_index())?
            .child(va.p2_index())?;
        Some(pt.0[usize::from(va.p1_index())])
    }

    /// Translate a virtual address through a present mapping.
    #[must_use]
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        let pte = self.lookup(va).filter(|pte| pte.is_present())?;
        Some(pte.addr() + u64::from(va.page_offset()))
    }

    /// Whether every byte of `[va, va + len)` is mapped present and user-accessible.
    ///
    /// Non-canonical addresses and ranges that wrap the address space are
    /// reported as unmapped. An empty range is trivially mapped.
    #[must_use]
    pub fn is_mapped(&self, va: u64, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        let Some(end) = va.checked_add(len) else {
            return false;
        };
        let mut page = page_round_down(va);
        while page < end {
            let Ok(addr) = VirtAddr::try_new(page) else {
                return false;
            };
            match self.lookup(addr) {
                Some(pte) if pte.is_present() && pte.is_user() => {}
                _ => return false,
            }
            match page.checked_add(PAGE_SIZE) {
                Some(next) => page = next,
                None => break,
            }
        }
        true
    }

    /// Build a new table from this one, visiting every present leaf entry.
    ///
    /// `transform` receives the entry's address and value and returns the
    /// entry to keep in `self` and the entry to install in the new table.
    pub fn duplicate_with<F>(&mut self, mut transform: F) -> PageTable
    where
        F: FnMut(VirtAddr, Pte) -> (Pte, Pte),
    {
        let mut child = PageTable::new();
        for (p4, pdpt) in self.root.slots.iter_mut().enumerate() {
            let Some(pdpt) = pdpt.as_deref_mut() else { continue };
            for (p3, pd) in pdpt.slots.iter_mut().enumerate() {
                let Some(pd) = pd.as_deref_mut() else { continue };
                for (p2, pt) in pd.slots.iter_mut().enumerate() {
                    let Some(pt) = pt.as_deref_mut() else { continue };
                    for (p1, pte) in pt.0.iter_mut().enumerate() {
                        if !pte.is_present() {
                            continue;
                        }
                        let va = address_of(p4, p3, p2, p1);
                        let (keep, copy) = transform(va, *pte);
                        *pte = keep;
                        *child.entry(va) = copy;
                    }
                }
            }
        }
        child
    }

    /// Every present leaf mapping, in address order.
    #[must_use]
    pub fn mappings(&self) -> Vec<(VirtAddr, Pte)> {
        let mut out = Vec::new();
        for (p4, pdpt) in self.root.slots.iter().enumerate() {
            let Some(pdpt) = pdpt.as_deref() else { continue };
            for (p3, pd) in pdpt.slots.iter().enumerate() {
                let Some(pd) = pd.as_deref() else { continue };
                for (p2, pt) in pd.slots.iter().enumerate() {
                    let Some(pt) = pt.as_deref() else { continue };
                    for (p1, pte) in pt.0.iter().enumerate() {
                        if pte.is_present() {
                            out.push((address_of(p4, p3, p2, p1), *pte));
                        }
                    }
                }
            }
        }
        out
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTable")
            .field("mappings", &self.mappings().len())
            .finish()
    }
}
