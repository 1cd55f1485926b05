//! ELF (Executable and Linkable Format) loader
//!
//! Only what is needed to build an address space from a 64-bit
//! little-endian executable: the entry point and the `PT_LOAD` program
//! headers. Header layouts are written down as [`Field`] tables and every
//! read is bounds-checked against the image.
//!
//! # Loading Process
//!
//! 1. Check the magic number
//! 2. Read program headers
//! 3. Map each loadable segment at or above [`USERMIN`] into fresh pages

use core::cmp::{max, min};
use x86_64::VirtAddr;
use x86_64::structures::paging::PageTableFlags;

use super::binary_reader::{BinaryReader, Field};
use super::{PageUse, Process};
use crate::config::{PAGE_SIZE, USERMIN, page_round_down, page_round_up};
use crate::errors::{self, ElfError, MapError};
use crate::kernel::mm::FrameArena;

/// ELF magic number (0x7F 'E' 'L' 'F'), read as a little-endian u32
pub const ELF_MAGIC: u32 = 0x464c_457f;

/// Loadable segment
pub const PT_LOAD: u32 = 1;

/// ELF header fields
mod ehdr {
    use super::Field;

    pub const MAGIC: Field = Field::u32(0);
    pub const ENTRY: Field = Field::u64(0x18);
    pub const PHOFF: Field = Field::u64(0x20);
    pub const PHENTSIZE: Field = Field::u16(0x36);
    pub const PHNUM: Field = Field::u16(0x38);
}

/// Program header fields
mod phdr {
    use super::Field;

    pub const TYPE: Field = Field::u32(0);
    pub const FLAGS: Field = Field::u32(4);
    pub const OFFSET: Field = Field::u64(8);
    pub const VADDR: Field = Field::u64(0x10);
    pub const FILESZ: Field = Field::u64(0x20);
    pub const MEMSZ: Field = Field::u64(0x28);
}

bitflags::bitflags! {
    /// Program header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Execute permission
        const X = 1 << 0;
        /// Write permission
        const W = 1 << 1;
        /// Read permission
        const R = 1 << 2;
    }
}

/// A borrowed ELF image
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    reader: BinaryReader<'a>,
    phnum: usize,
}

/// One program header, with its file bytes borrowed from the image
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader<'a> {
    /// Index in the program header table
    pub index: usize,
    /// Segment type
    pub kind: u32,
    /// Segment flags
    pub flags: SegmentFlags,
    /// Segment virtual address
    pub vaddr: u64,
    /// Segment size in file
    pub filesz: u64,
    /// Segment size in memory
    pub memsz: u64,
    /// The `filesz` bytes of the segment
    pub data: &'a [u8],
}

impl ProgramHeader<'_> {
    /// Whether this is a `PT_LOAD` segment
    #[must_use]
    pub fn is_load(&self) -> bool {
        self.kind == PT_LOAD
    }

    /// Whether the segment is mapped writable
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(SegmentFlags::W)
    }
}

impl<'a> ElfImage<'a> {
    /// Wrap `data` after checking the magic number and reading `e_phnum`.
    ///
    /// # Errors
    ///
    /// [`ElfError::BadMagic`] or [`ElfError::Truncated`].
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let mut image = Self {
            reader: BinaryReader::new(data),
            phnum: 0,
        };
        let magic = image.read(0, ehdr::MAGIC)? as u32;
        if magic != ELF_MAGIC {
            return Err(ElfError::BadMagic(magic));
        }
        image.phnum = image.read(0, ehdr::PHNUM)? as usize;
        Ok(image)
    }

    /// Raw image bytes
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.reader.slice(0, self.reader.len()).unwrap_or_default()
    }

    /// Number of program headers
    #[must_use]
    pub const fn header_count(&self) -> usize {
        self.phnum
    }

    /// Entry point (`e_entry`)
    pub fn entry(&self) -> Result<u64, ElfError> {
        self.read(0, ehdr::ENTRY)
    }

    /// Program header `index`
    ///
    /// # Errors
    ///
    /// * [`ElfError::HeaderIndex`] - `index` is not below `e_phnum`
    /// * [`ElfError::Truncated`] - the header itself lies past the image
    /// * [`ElfError::SegmentOutOfBounds`] - the segment's file range lies past the image
    /// * [`ElfError::SegmentSize`] - `p_memsz < p_filesz`
    pub fn header(&self, index: usize) -> Result<ProgramHeader<'a>, ElfError> {
        if index >= self.phnum {
            return Err(ElfError::HeaderIndex(index));
        }
        let phoff = self.read(0, ehdr::PHOFF)?;
        let entsize = self.read(0, ehdr::PHENTSIZE)?;
        let base = (index as u64)
            .checked_mul(entsize)
            .and_then(|rel| rel.checked_add(phoff))
            .and_then(|base| usize::try_from(base).ok())
            .ok_or(ElfError::Truncated {
                offset: usize::MAX,
                len: entsize as usize,
            })?;

        let kind = self.read(base, phdr::TYPE)? as u32;
        let flags = SegmentFlags::from_bits_truncate(self.read(base, phdr::FLAGS)? as u32);
        let offset = self.read(base, phdr::OFFSET)?;
        let vaddr = self.read(base, phdr::VADDR)?;
        let filesz = self.read(base, phdr::FILESZ)?;
        let memsz = self.read(base, phdr::MEMSZ)?;

        let data = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(filesz).ok())
            .and_then(|(offset, len)| self.reader.slice(offset, len))
            .ok_or(ElfError::SegmentOutOfBounds { index })?;
        if memsz < filesz {
            return Err(ElfError::SegmentSize { index });
        }

        Ok(ProgramHeader {
            index,
            kind,
            flags,
            vaddr,
            filesz,
            memsz,
            data,
        })
    }

    /// All program headers, in table order
    pub fn headers(&self) -> impl Iterator<Item = Result<ProgramHeader<'a>, ElfError>> + '_ {
        (0..self.phnum).map(|index| self.header(index))
    }

    /// Dump the program header table at info level
    pub fn log_headers(&self) {
        log::info!(
            "[ELF] entry={:#x} phnum={}",
            self.entry().unwrap_or(0),
            self.phnum
        );
        for header in self.headers() {
            match header {
                Ok(h) => log::info!(
                    "[ELF] phdr {}: type={} flags={:?} vaddr={:#x} filesz={:#x} memsz={:#x}",
                    h.index,
                    h.kind,
                    h.flags,
                    h.vaddr,
                    h.filesz,
                    h.memsz
                ),
                Err(e) => log::info!("[ELF] bad phdr: {}", e),
            }
        }
    }

    fn read(&self, base: usize, field: Field) -> Result<u64, ElfError> {
        self.reader
            .read_field(base, field)
            .ok_or(ElfError::Truncated {
                offset: base.saturating_add(field.offset),
                len: field.width.size(),
            })
    }
}

/// Load every `PT_LOAD` segment at or above [`USERMIN`] into `process`.
///
/// # Panics
///
/// A malformed image, or running out of physical pages, is fatal.
pub fn load(process: &mut Process, image: &ElfImage<'_>, frames: &FrameArena) {
    for header in image.headers() {
        let header = match header {
            Ok(h) => h,
            Err(e) => panic!("[ELF] malformed image for {}: {}", process.name(), e),
        };
        if !header.is_load() {
            continue;
        }
        if header.vaddr < USERMIN {
            log::debug!(
                "[ELF] skipping segment {} at {:#x} (below user space)",
                header.index,
                header.vaddr
            );
            continue;
        }
        if let Err(e) = load_segment(process, &header, frames) {
            panic!("[ELF] failed to load segment {}: {}", header.index, e);
        }
    }
}

/// Map one segment into fresh, zeroed pages owned by `process`.
///
/// The span `[round_down(vaddr), round_up(vaddr + memsz))` is covered page by
/// page; each page receives the part of the file bytes that overlaps it and
/// is installed user-accessible (and writable if the segment is).
///
/// # Panics
///
/// Panics if no physical page is available.
pub fn load_segment(
    process: &mut Process,
    header: &ProgramHeader<'_>,
    frames: &FrameArena,
) -> errors::Result<()> {
    let seg_start = header.vaddr;
    let file_end = seg_start
        .checked_add(header.filesz)
        .ok_or(ElfError::SegmentSize { index: header.index })?;
    let span_end = seg_start
        .checked_add(header.memsz)
        .and_then(page_round_up)
        .ok_or(ElfError::SegmentSize { index: header.index })?;

    let mut perms = PageTableFlags::USER_ACCESSIBLE;
    if header.is_writable() {
        perms |= PageTableFlags::WRITABLE;
    }

    log::debug!(
        "[ELF] Loading segment {}: vaddr={:#x}, filesz={:#x}, memsz={:#x}, flags={:?}",
        header.index,
        header.vaddr,
        header.filesz,
        header.memsz,
        header.flags
    );

    let mut va = page_round_down(seg_start);
    while va < span_end {
        let page = VirtAddr::try_new(va).map_err(|_| MapError::NonCanonical(va))?;
        let Some(frame) = process.alloc_page(frames, PageUse::Segment) else {
            panic!("[ELF] out of memory loading segment {} at {:#x}", header.index, va);
        };

        let lo = max(va, seg_start);
        let hi = min(va + PAGE_SIZE, file_end);
        if lo < hi {
            let src = &header.data[(lo - seg_start) as usize..(hi - seg_start) as usize];
            let dst = (lo - va) as usize;
            frames.with_frame_mut(frame, |bytes| {
                bytes[dst..dst + src.len()].copy_from_slice(src);
            });
        }

        process.page_insert(frames, page, frame, perms, true)?;
        va += PAGE_SIZE;
    }
    Ok(())
}
