//! The FDT binary format: header, memory reservation block, and the raw
//! structure tokens.
//!
//! An FDT blob carries four sections: the header, the memory reservation
//! block (`(address, size)` pairs terminated by a zero entry), the
//! structure block (the tree as a token stream), and the strings block
//! (property names). The header is 8-byte aligned, reservation entries
//! 8-byte, structure tokens 4-byte; every field is big-endian.

use core::ops::Range;

use dataview::Pod;
use snafu::{Snafu, ensure};

use crate::endian::Be;

pub(crate) const MAGIC: u32 = 0xd00d_feed;
pub(crate) const SPEC_VERSION: u32 = 17;
pub(crate) const HEADER_ALIGNMENT: usize = 8;
pub(crate) const STRUCTURE_ALIGNMENT: usize = 4;

/// Errors detected while validating an FDT header.
#[derive(Debug, Snafu)]
pub enum HeaderError {
    #[snafu(display("invalid magic number: {magic:#x}"))]
    InvalidMagic {
        magic: u32,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display(
        "incompatible devicetree version: version={version}, \
         last_comp_version={last_comp_version}"
    ))]
    IncompatibleVersion {
        version: u32,
        last_comp_version: u32,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display(
        "inconsistent devicetree layout: totalsize={totalsize:#x}, \
         off_mem_rsvmap={off_mem_rsvmap:#x}, off_dt_struct={off_dt_struct:#x}, \
         size_dt_struct={size_dt_struct:#x}, off_dt_strings={off_dt_strings:#x}, \
         size_dt_strings={size_dt_strings:#x}"
    ))]
    InvalidLayout {
        totalsize: u32,
        off_mem_rsvmap: u32,
        off_dt_struct: u32,
        size_dt_struct: u32,
        off_dt_strings: u32,
        size_dt_strings: u32,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// The FDT header at offset zero of every blob.
#[repr(C)]
#[derive(Debug)]
pub struct Header {
    /// The value `0xd00dfeed`.
    pub magic: Be<u32>,
    /// Total size in bytes of the whole blob.
    pub totalsize: Be<u32>,
    /// Offset of the structure block.
    pub off_dt_struct: Be<u32>,
    /// Offset of the strings block.
    pub off_dt_strings: Be<u32>,
    /// Offset of the memory reservation block.
    pub off_mem_rsvmap: Be<u32>,
    /// Format version of this blob.
    pub version: Be<u32>,
    /// Oldest version this blob is backwards compatible with.
    pub last_comp_version: Be<u32>,
    /// Physical ID of the boot CPU.
    pub boot_cpuid_phys: Be<u32>,
    /// Length of the strings block.
    pub size_dt_strings: Be<u32>,
    /// Length of the structure block.
    pub size_dt_struct: Be<u32>,
}

// SAFETY: all fields are Pod and the layout has no padding.
unsafe impl Pod for Header {}
const _: () = assert!(size_of::<Header>() == 40);

impl Header {
    /// Whether `addr` could hold a header at all.
    #[must_use]
    pub fn is_valid_addr(addr: usize) -> bool {
        addr.is_multiple_of(HEADER_ALIGNMENT)
    }

    /// Checks magic, version compatibility, and section layout.
    pub fn validate(&self) -> Result<(), HeaderError> {
        let magic = self.magic.read();
        ensure!(magic == MAGIC, InvalidMagicSnafu { magic });

        let version = self.version.read();
        let last_comp_version = self.last_comp_version.read();
        ensure!(
            version == SPEC_VERSION || last_comp_version <= SPEC_VERSION,
            IncompatibleVersionSnafu {
                version,
                last_comp_version,
            }
        );

        let totalsize = self.totalsize.read();
        let off_mem_rsvmap = self.off_mem_rsvmap.read();
        let off_dt_struct = self.off_dt_struct.read();
        let size_dt_struct = self.size_dt_struct.read();
        let off_dt_strings = self.off_dt_strings.read();
        let size_dt_strings = self.size_dt_strings.read();
        let header_size = size_of::<Self>() as u32;

        let layout_ok = header_size <= off_mem_rsvmap
            && off_mem_rsvmap <= off_dt_struct
            && off_dt_struct
                .checked_add(size_dt_struct)
                .is_some_and(|end| end <= off_dt_strings)
            && off_dt_strings
                .checked_add(size_dt_strings)
                .is_some_and(|end| end <= totalsize)
            && (off_mem_rsvmap as usize).is_multiple_of(HEADER_ALIGNMENT)
            && (off_dt_struct as usize).is_multiple_of(STRUCTURE_ALIGNMENT);
        ensure!(
            layout_ok,
            InvalidLayoutSnafu {
                totalsize,
                off_mem_rsvmap,
                off_dt_struct,
                size_dt_struct,
                off_dt_strings,
                size_dt_strings,
            }
        );

        Ok(())
    }
}

/// One `/memreserve/` entry: a region firmware wants left alone.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ReserveEntry {
    pub address: Be<u64>,
    pub size: Be<u64>,
}

// SAFETY: two big-endian u64 fields, no padding.
unsafe impl Pod for ReserveEntry {}

impl ReserveEntry {
    /// The all-zero entry terminating the reservation block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.address.read() == 0 && self.size.read() == 0
    }

    /// The reserved interval, saturating rather than wrapping.
    #[must_use]
    pub fn range(&self) -> Range<u64> {
        let start = self.address.read();
        start..start.saturating_add(self.size.read())
    }
}

/// A raw token from the structure block.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructToken(pub Be<u32>);

// SAFETY: repr(transparent) over a Pod field.
unsafe impl Pod for StructToken {}

impl StructToken {
    pub const BEGIN_NODE: u32 = 0x0000_0001;
    pub const END_NODE: u32 = 0x0000_0002;
    pub const PROP: u32 = 0x0000_0003;
    pub const NOP: u32 = 0x0000_0004;
    pub const END: u32 = 0x0000_0009;
}

/// Length and name offset preceding every property value.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PropHeader {
    pub len: Be<u32>,
    pub nameoff: Be<u32>,
}

// SAFETY: two big-endian u32 fields, no padding.
unsafe impl Pod for PropHeader {}
