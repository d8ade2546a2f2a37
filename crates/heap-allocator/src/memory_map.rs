//! Boot-time physical memory map.
//!
//! The boot loader leaves a table of [`MemoryMapEntry`] records at
//! [`BOOT_MEMORY_MAP_ADDR`]. The table ends with an all-zero entry. Only
//! entries of type [`RegionType::Usable`] are of interest to the heap, and
//! at most [`MAX_MEMORY_MAP_ENTRIES`] entries are examined.

use core::{fmt, ops::Range, slice};

use ansi_term::{Color, WithFg};
use arrayvec::ArrayVec;
use dataview::{DataView, Pod};
use platform_cast::CastFrom as _;

/// Physical address of the table written by the boot loader.
pub const BOOT_MEMORY_MAP_ADDR: usize = 0x7000;

/// Maximum number of entries read from the table.
pub const MAX_MEMORY_MAP_ENTRIES: usize = 32;

/// Region type reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum RegionType {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    Unknown(u32),
}

impl From<u32> for RegionType {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Usable,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            _ => Self::Unknown(value),
        }
    }
}

/// Raw table entry as laid out in memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub struct MemoryMapEntry {
    base: u64,
    length: u64,
    region_type: u32,
    attributes: u32,
}

const _: () = assert!(size_of::<MemoryMapEntry>() == 24);

impl MemoryMapEntry {
    /// The all-zero entry that ends the table.
    pub const TERMINATOR: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(base: u64, length: u64, region_type: u32) -> Self {
        Self {
            base,
            length,
            region_type,
            attributes: 0,
        }
    }

    #[must_use]
    pub fn is_terminator(&self) -> bool {
        *self == Self::TERMINATOR
    }

    #[must_use]
    pub fn region_type(&self) -> RegionType {
        RegionType::from(self.region_type)
    }

    #[must_use]
    pub fn range(&self) -> MemoryRange {
        MemoryRange::new(self.base, self.length)
    }
}

/// A physical address range `[base, base + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub base: u64,
    pub length: u64,
}

impl MemoryRange {
    #[must_use]
    pub const fn new(base: u64, length: u64) -> Self {
        Self { base, length }
    }

    /// Exclusive end address, saturated at `u64::MAX`.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    /// The range in native addresses.
    #[must_use]
    pub fn addr_range(&self) -> Range<usize> {
        usize::cast_from(self.base)..usize::cast_from(self.end())
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} - {:#x}", self.base, self.end())
    }
}

/// Usable ranges collected from a boot memory table.
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    ranges: ArrayVec<MemoryRange, MAX_MEMORY_MAP_ENTRIES>,
}

impl MemoryMap {
    /// Collects the usable ranges from `entries`.
    ///
    /// Reading stops at the first terminator entry or after
    /// [`MAX_MEMORY_MAP_ENTRIES`] entries, whichever comes first.
    #[must_use]
    pub fn from_entries(entries: &[MemoryMapEntry]) -> Self {
        let ranges = entries
            .iter()
            .take(MAX_MEMORY_MAP_ENTRIES)
            .take_while(|entry| !entry.is_terminator())
            .filter(|entry| entry.region_type().is_usable())
            .map(MemoryMapEntry::range)
            .collect();
        Self { ranges }
    }

    /// Reads the table the boot loader left at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must point to readable memory holding
    /// [`MAX_MEMORY_MAP_ENTRIES`] entries, or fewer followed by a terminator.
    /// It must be aligned for [`MemoryMapEntry`].
    #[must_use]
    pub unsafe fn from_addr(addr: usize) -> Self {
        let ptr = core::ptr::with_exposed_provenance::<u8>(addr);
        let len = size_of::<MemoryMapEntry>() * MAX_MEMORY_MAP_ENTRIES;
        let bytes = unsafe { slice::from_raw_parts(ptr, len) };
        let entries = DataView::from(bytes).slice::<MemoryMapEntry>(0, MAX_MEMORY_MAP_ENTRIES);
        Self::from_entries(entries)
    }

    #[must_use]
    pub fn usable_ranges(&self) -> &[MemoryRange] {
        &self.ranges
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Writes one `base - end` line per usable range.
    pub fn dump<W>(&self, out: &mut W, color: bool) -> fmt::Result
    where
        W: fmt::Write,
    {
        writeln!(out, "{}", WithFg::maybe(color, Color::Cyan, "Memory Ranges"))?;
        writeln!(out, "---------------")?;
        for range in &self.ranges {
            writeln!(out, "{range}")?;
        }
        Ok(())
    }
}
