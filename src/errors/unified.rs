// src/errors/unified.rs

//! Unified error types for the kernel
//!
//! Each subsystem owns a small `Copy` error enum; `KernelError` wraps them
//! so callers that cross subsystem boundaries can use a single `Result`.

use core::fmt;

/// Top-level kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// ELF image parsing error
    Elf(ElfError),
    /// Page fault could not be resolved
    PageFault(PageFaultError),
    /// Page table update rejected
    Map(MapError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Elf(e) => write!(f, "ELF error: {}", e),
            KernelError::PageFault(e) => write!(f, "Page fault error: {}", e),
            KernelError::Map(e) => write!(f, "Mapping error: {}", e),
        }
    }
}

/// ELF image errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The first word is not `\x7fELF`
    BadMagic(u32),
    /// A field read ran past the end of the image
    Truncated {
        /// Byte offset of the read
        offset: usize,
        /// Size of the read in bytes
        len: usize,
    },
    /// Program header index is not below `e_phnum`
    HeaderIndex(usize),
    /// Segment file range lies outside the image
    SegmentOutOfBounds {
        /// Program header index
        index: usize,
    },
    /// Segment memory size is smaller than its file size
    SegmentSize {
        /// Program header index
        index: usize,
    },
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfError::BadMagic(magic) => write!(f, "bad magic {:#010x}", magic),
            ElfError::Truncated { offset, len } => {
                write!(f, "read of {} bytes at {:#x} past end of image", len, offset)
            }
            ElfError::HeaderIndex(i) => write!(f, "program header {} out of range", i),
            ElfError::SegmentOutOfBounds { index } => {
                write!(f, "segment {} file range outside image", index)
            }
            ElfError::SegmentSize { index } => {
                write!(f, "segment {} memsz smaller than filesz", index)
            }
        }
    }
}

impl From<ElfError> for KernelError {
    fn from(err: ElfError) -> Self {
        KernelError::Elf(err)
    }
}

/// Page table update errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Virtual address is not page aligned
    UnalignedVirtual(u64),
    /// Virtual address is not canonical
    NonCanonical(u64),
    /// Physical address is not a live frame
    UnknownFrame(u64),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::UnalignedVirtual(va) => write!(f, "unaligned virtual address {:#x}", va),
            MapError::NonCanonical(va) => write!(f, "non-canonical address {:#x}", va),
            MapError::UnknownFrame(pa) => write!(f, "no live frame at {:#x}", pa),
        }
    }
}

impl From<MapError> for KernelError {
    fn from(err: MapError) -> Self {
        KernelError::Map(err)
    }
}

/// Page fault handling errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultError {
    /// No present user mapping covers the address
    NotMapped,
    /// Access not permitted by the mapping (e.g. write to a read-only page)
    AccessViolation,
    /// Installing the private copy failed
    Map(MapError),
}

impl fmt::Display for PageFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageFaultError::NotMapped => write!(f, "address not mapped"),
            PageFaultError::AccessViolation => write!(f, "access violation"),
            PageFaultError::Map(e) => write!(f, "remap failed: {}", e),
        }
    }
}

impl From<MapError> for PageFaultError {
    fn from(err: MapError) -> Self {
        PageFaultError::Map(err)
    }
}

impl From<PageFaultError> for KernelError {
    fn from(err: PageFaultError) -> Self {
        KernelError::PageFault(err)
    }
}

/// Result type alias for kernel operations
pub type Result<T> = core::result::Result<T, KernelError>;
