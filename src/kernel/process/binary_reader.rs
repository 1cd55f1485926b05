// src/kernel/process/binary_reader.rs
//! Binary reader utilities for ELF loading
//!
//! Provides bounds-checked little-endian reads at absolute offsets, plus a
//! small [`Field`] descriptor so header layouts can be written down as data.

/// Width of a fixed-size integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// 2 bytes
    U16,
    /// 4 bytes
    U32,
    /// 8 bytes
    U64,
}

impl Width {
    /// Size in bytes
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }
}

/// A little-endian integer at a fixed offset within a structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Offset from the start of the structure
    pub offset: usize,
    /// Field width
    pub width: Width,
}

impl Field {
    /// 16-bit field at `offset`
    #[must_use]
    pub const fn u16(offset: usize) -> Self {
        Self { offset, width: Width::U16 }
    }

    /// 32-bit field at `offset`
    #[must_use]
    pub const fn u32(offset: usize) -> Self {
        Self { offset, width: Width::U32 }
    }

    /// 64-bit field at `offset`
    #[must_use]
    pub const fn u64(offset: usize) -> Self {
        Self { offset, width: Width::U64 }
    }
}

/// Binary reader for safely reading structured data
#[derive(Debug, Clone, Copy)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    /// Create a new binary reader
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Length of the underlying buffer
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow `len` bytes starting at `offset`
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        let end = offset.checked_add(len)?;
        self.data.get(offset..end)
    }

    fn array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        self.slice(offset, N)?.try_into().ok()
    }

    /// Read a u16 (little endian)
    #[must_use]
    pub fn read_u16_at(&self, offset: usize) -> Option<u16> {
        self.array(offset).map(u16::from_le_bytes)
    }

    /// Read a u32 (little endian)
    #[must_use]
    pub fn read_u32_at(&self, offset: usize) -> Option<u32> {
        self.array(offset).map(u32::from_le_bytes)
    }

    /// Read a u64 (little endian)
    #[must_use]
    pub fn read_u64_at(&self, offset: usize) -> Option<u64> {
        self.array(offset).map(u64::from_le_bytes)
    }

    /// Read `field` of the structure that starts at `base`, widened to u64
    #[must_use]
    pub fn read_field(&self, base: usize, field: Field) -> Option<u64> {
        let offset = base.checked_add(field.offset)?;
        match field.width {
            Width::U16 => self.read_u16_at(offset).map(u64::from),
            Width::U32 => self.read_u32_at(offset).map(u64::from),
            Width::U64 => self.read_u64_at(offset),
        }
    }
}
