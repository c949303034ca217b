//! An in-memory blob builder for tests.
//!
//! Assembles header, reservation block, structure block, and strings
//! block into a properly aligned, leaked buffer. Only compiled for this
//! crate's own tests and for dependants that opt into the `testing`
//! feature.

use alloc::{boxed::Box, vec, vec::Vec};

use crate::layout::{MAGIC, SPEC_VERSION, StructToken};

#[derive(Default)]
pub struct BlobBuilder {
    reservations: Vec<(u64, u64)>,
    structure: Vec<u8>,
    strings: Vec<u8>,
}

impl BlobBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, address: u64, size: u64) -> &mut Self {
        self.reservations.push((address, size));
        self
    }

    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.push_token(StructToken::BEGIN_NODE);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad_structure();
        self
    }

    pub fn end_node(&mut self) -> &mut Self {
        self.push_token(StructToken::END_NODE)
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push_token(StructToken::NOP)
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let nameoff = self.intern(name);
        self.push_token(StructToken::PROP);
        self.structure
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structure.extend_from_slice(&nameoff.to_be_bytes());
        self.structure.extend_from_slice(value);
        self.pad_structure();
        self
    }

    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    /// Builds the blob and leaks it into an 8-byte-aligned buffer.
    pub fn finish(&mut self) -> &'static [u8] {
        self.push_token(StructToken::END);

        let header_size = 40;
        let rsvmap_size = (self.reservations.len() + 1) * 16;
        let off_mem_rsvmap = header_size;
        let off_dt_struct = off_mem_rsvmap + rsvmap_size;
        let off_dt_strings = off_dt_struct + self.structure.len();
        let totalsize = off_dt_strings + self.strings.len();

        let mut bytes = Vec::new();
        for field in [
            MAGIC,
            totalsize as u32,
            off_dt_struct as u32,
            off_dt_strings as u32,
            off_mem_rsvmap as u32,
            SPEC_VERSION,
            16, // last_comp_version
            0,  // boot_cpuid_phys
            self.strings.len() as u32,
            self.structure.len() as u32,
        ] {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        for &(address, size) in &self.reservations {
            bytes.extend_from_slice(&address.to_be_bytes());
            bytes.extend_from_slice(&size.to_be_bytes());
        }
        bytes.extend_from_slice(&[0; 16]);
        bytes.extend_from_slice(&self.structure);
        bytes.extend_from_slice(&self.strings);

        // Re-home into a u64-backed buffer so the header alignment
        // requirement holds.
        let words = bytes.len().div_ceil(8);
        let buffer: &'static mut [u64] = Box::leak(vec![0_u64; words].into_boxed_slice());
        let raw = buffer.as_mut_ptr().cast::<u8>();
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), raw, bytes.len());
            core::slice::from_raw_parts(raw, bytes.len())
        }
    }

    fn push_token(&mut self, token: u32) -> &mut Self {
        self.structure.extend_from_slice(&token.to_be_bytes());
        self
    }

    fn pad_structure(&mut self) {
        while !self.structure.len().is_multiple_of(4) {
            self.structure.push(0);
        }
    }

    fn intern(&mut self, name: &str) -> u32 {
        let nameoff = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        nameoff
    }
}
