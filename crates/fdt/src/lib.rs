//! Zero-copy reader for Flattened Devicetree (FDT) blobs.
//!
//! The bootstrap needs exactly three things out of the devicetree the
//! firmware hands over: where RAM is (the `memory` nodes), what must be
//! left alone (the `/memreserve/` block), and how big the blob itself is
//! (so it can be reserved too). This crate parses just enough of the
//! [Devicetree Specification] flattened format to answer those questions
//! without copying or allocating.
//!
//! [`Fdt`] validates the header and slices the blob into its sections;
//! [`TokenLexer`] walks the structure block token by token; and
//! [`memory_regions`] runs the walk that extracts `reg` ranges from the
//! `memory` nodes, honouring `#address-cells`/`#size-cells`.
//!
//! [Devicetree Specification]: https://devicetree-specification.readthedocs.io/en/stable/flattened-format.html

#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

use core::{ptr, slice};

use dataview::DataView;
use snafu::{ResultExt as _, Snafu, ensure};

pub use self::{
    layout::{Header, HeaderError, ReserveEntry},
    lexer::{LexError, Token, TokenLexer},
    memory::{MemoryRegion, MemoryWalkError, memory_regions},
};

mod endian;
mod layout;
mod lexer;
mod memory;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Errors from mounting a blob as a devicetree.
#[derive(Debug, Snafu)]
pub enum FdtError {
    #[snafu(display("blob address {addr:#x} is not 8-byte aligned"))]
    UnalignedBlob {
        addr: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("blob is {len} bytes, header claims {need}"))]
    TruncatedBlob {
        len: usize,
        need: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("invalid devicetree header: {source}"))]
    InvalidHeader {
        #[snafu(source)]
        source: layout::HeaderError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// A validated view over a flattened devicetree blob.
#[derive(Clone, Copy)]
pub struct Fdt<'blob> {
    header: &'blob Header,
    pub(crate) struct_block: &'blob DataView,
    pub(crate) string_block: &'blob [u8],
    mem_rsvmap: &'blob [ReserveEntry],
}

impl core::fmt::Debug for Fdt<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fdt")
            .field("header", &self.header)
            .field("string_block", &self.string_block)
            .field("mem_rsvmap", &self.mem_rsvmap)
            .finish_non_exhaustive()
    }
}

impl Fdt<'static> {
    /// Mounts the devicetree at a physical address.
    ///
    /// # Safety
    ///
    /// `addr` must point to a complete FDT blob that stays mapped and
    /// unmodified for the rest of the program.
    pub unsafe fn from_addr(addr: usize) -> Result<Self, FdtError> {
        ensure!(Header::is_valid_addr(addr), UnalignedBlobSnafu { addr });

        let ptr = ptr::with_exposed_provenance::<u8>(addr);
        let header_bytes = unsafe { slice::from_raw_parts(ptr, size_of::<Header>()) };
        let header = DataView::from(header_bytes).get::<Header>(0);
        header.validate().context(InvalidHeaderSnafu)?;

        let totalsize = header.totalsize.read() as usize;
        let bytes = unsafe { slice::from_raw_parts(ptr, totalsize) };
        Self::from_bytes(bytes)
    }
}

impl<'blob> Fdt<'blob> {
    /// Mounts a devicetree over a byte slice.
    ///
    /// The slice must start at the header (8-byte aligned) and contain
    /// the whole blob.
    pub fn from_bytes(bytes: &'blob [u8]) -> Result<Self, FdtError> {
        let addr = bytes.as_ptr().addr();
        ensure!(Header::is_valid_addr(addr), UnalignedBlobSnafu { addr });
        ensure!(
            bytes.len() >= size_of::<Header>(),
            TruncatedBlobSnafu {
                len: bytes.len(),
                need: size_of::<Header>(),
            }
        );

        let view = DataView::from(bytes);
        let header = view.get::<Header>(0);
        header.validate().context(InvalidHeaderSnafu)?;

        let totalsize = header.totalsize.read() as usize;
        ensure!(
            bytes.len() >= totalsize,
            TruncatedBlobSnafu {
                len: bytes.len(),
                need: totalsize,
            }
        );

        let struct_start = header.off_dt_struct.read() as usize;
        let struct_len = header.size_dt_struct.read() as usize;
        let struct_block = &view[struct_start..][..struct_len];

        let string_start = header.off_dt_strings.read() as usize;
        let string_len = header.size_dt_strings.read() as usize;
        let string_block = view.slice::<u8>(string_start, string_len);

        let rsvmap_start = header.off_mem_rsvmap.read() as usize;
        let rsvmap_len = (struct_start - rsvmap_start) / size_of::<ReserveEntry>();
        let mem_rsvmap = view.slice::<ReserveEntry>(rsvmap_start, rsvmap_len);
        let mem_rsvmap = mem_rsvmap
            .iter()
            .position(ReserveEntry::is_terminator)
            .map_or(mem_rsvmap, |end| &mem_rsvmap[..end]);

        Ok(Self {
            header,
            struct_block,
            string_block,
            mem_rsvmap,
        })
    }

    /// The validated header.
    #[must_use]
    pub fn header(&self) -> &'blob Header {
        self.header
    }

    /// Total size of the blob in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.header.totalsize.read() as usize
    }

    /// The blob itself, header included.
    #[must_use]
    pub fn as_bytes(&self) -> &'blob [u8] {
        let data = ptr::from_ref(self.header).cast();
        // SAFETY: construction proved `size()` bytes starting at the
        // header are part of one allocation.
        unsafe { slice::from_raw_parts(data, self.size()) }
    }

    /// The `/memreserve/` entries, terminator excluded.
    #[must_use]
    pub fn reserved_entries(&self) -> &'blob [ReserveEntry] {
        self.mem_rsvmap
    }

    /// An iterator over the structure block.
    #[must_use]
    pub fn tokens<'tree>(&'tree self) -> TokenLexer<'blob, 'tree> {
        TokenLexer::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::BlobBuilder, *};

    fn simple_blob() -> &'static [u8] {
        let mut builder = BlobBuilder::new();
        builder
            .reserve(0x4000_0000, 0x1000)
            .reserve(0x8000_0000, 0x2000)
            .begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("memory@40000000")
            .prop("device_type", b"memory\0")
            .end_node()
            .end_node();
        builder.finish()
    }

    #[test]
    fn test_parse_header() {
        let fdt = Fdt::from_bytes(simple_blob()).unwrap();
        assert_eq!(fdt.header().magic.read(), 0xd00d_feed);
        assert_eq!(fdt.size(), fdt.as_bytes().len());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = simple_blob().to_vec();
        bytes[0] = 0xff;
        // Preserve alignment while corrupting the magic.
        let mut aligned = vec![0_u64; bytes.len().div_ceil(8)];
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                aligned.as_mut_ptr().cast::<u8>(),
                bytes.len(),
            );
        }
        let view = unsafe { core::slice::from_raw_parts(aligned.as_ptr().cast(), bytes.len()) };
        assert!(matches!(
            Fdt::from_bytes(view),
            Err(FdtError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_rejects_unaligned() {
        let blob = simple_blob();
        // A word-aligned buffer viewed at offset 4 is reliably misaligned.
        let mut storage = vec![0_u64; blob.len().div_ceil(8) + 1];
        let base = storage.as_mut_ptr().cast::<u8>();
        let view = unsafe {
            core::ptr::copy_nonoverlapping(blob.as_ptr(), base.add(4), blob.len());
            core::slice::from_raw_parts(base.add(4), blob.len())
        };
        assert!(matches!(
            Fdt::from_bytes(view),
            Err(FdtError::UnalignedBlob { .. })
        ));
        drop(storage);
    }

    #[test]
    fn test_reserved_entries() {
        let fdt = Fdt::from_bytes(simple_blob()).unwrap();
        let reserved = fdt.reserved_entries();
        assert_eq!(reserved.len(), 2);
        assert_eq!(reserved[0].range(), 0x4000_0000..0x4000_1000);
        assert_eq!(reserved[1].range(), 0x8000_0000..0x8000_2000);
    }

    #[test]
    fn test_token_stream() {
        let fdt = Fdt::from_bytes(simple_blob()).unwrap();
        let tokens: Vec<_> = fdt.tokens().collect::<Result<_, _>>().unwrap();

        assert_eq!(
            tokens,
            vec![
                Token::BeginNode { name: "" },
                Token::Prop {
                    name: "#address-cells",
                    value: &2_u32.to_be_bytes(),
                },
                Token::Prop {
                    name: "#size-cells",
                    value: &2_u32.to_be_bytes(),
                },
                Token::BeginNode {
                    name: "memory@40000000",
                },
                Token::Prop {
                    name: "device_type",
                    value: b"memory\0",
                },
                Token::EndNode,
                Token::EndNode,
                Token::End,
            ]
        );
    }

    #[test]
    fn test_nop_tokens_survive_lexing() {
        let mut builder = BlobBuilder::new();
        builder.begin_node("").nop().end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();
        let tokens: Vec<_> = fdt.tokens().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::BeginNode { name: "" },
                Token::Nop,
                Token::EndNode,
                Token::End,
            ]
        );
    }
}
