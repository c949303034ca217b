//! The multi-zone physical allocator façade.
//!
//! [`PhysMemory`] owns every [`Zone`] and is the type the kernel wraps in
//! its process-wide singleton. It is built from a firmware-derived
//! [`MemoryMap`] by [`setup`](PhysMemory::setup): each maximal contiguous
//! run of the map becomes one zone, the zone's page descriptors are carved
//! out of the map itself, and whatever the map still holds as free is
//! released into the buddy freelists.
//!
//! Allocations are named by [`PageBlock`] handles. A `PageBlock` is
//! deliberately not `Copy` or `Clone`: it stands for ownership of the run,
//! and giving it back to [`PhysMemory::free`] consumes it. The
//! drop-to-free smart handle lives in the kernel crate, next to the
//! singleton it needs.

use core::{ops::Range, ptr, slice};

use arrayvec::ArrayVec;
use range_map::{MemoryMap, MemoryStatus};
use snafu::{OptionExt as _, Snafu, ensure};

use crate::{Align as _, MAX_ORDER, PAGE_BITS, PAGE_SIZE, page::Page, zone::Zone};

/// Maximum number of zones a map can bootstrap into.
pub const MAX_ZONES: usize = 32;

/// Owning name of one buddy allocation: which zone, where, and how big.
///
/// Move-only by design; the allocation is released by passing the block to
/// [`PhysMemory::free`].
#[derive(Debug, PartialEq, Eq)]
pub struct PageBlock {
    addr: usize,
    zone: u32,
    order: u32,
}

impl PageBlock {
    /// Physical address of the first byte.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Buddy order of the run.
    #[must_use]
    pub fn order(&self) -> usize {
        self.order as usize
    }

    /// Size of the run in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        PAGE_SIZE << self.order
    }

    /// The covered address interval.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.addr..self.addr + self.size()
    }

    /// Index of the owning zone within its [`PhysMemory`].
    #[must_use]
    pub fn zone_index(&self) -> usize {
        self.zone as usize
    }
}

/// Errors from bootstrapping zones out of a memory map.
#[derive(Debug, Snafu)]
pub enum SetupError {
    /// More contiguous memory runs than the zone table can hold.
    #[snafu(display("zone table full, cannot add zone {begin:#x}..{end:#x}"))]
    ZoneTableFull {
        begin: usize,
        end: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    /// No free range could hold the page descriptor array for a zone.
    #[snafu(display(
        "cannot allocate {bytes:#x} descriptor bytes for zone {begin:#x}..{end:#x}"
    ))]
    DescriptorAlloc {
        begin: usize,
        end: usize,
        bytes: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    /// A free range of the map lies outside every created zone.
    #[snafu(display("free range {begin:#x}..{end:#x} not covered by any zone"))]
    OrphanRange {
        begin: usize,
        end: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// All physical memory, as a registration-ordered collection of zones.
pub struct PhysMemory {
    zones: ArrayVec<Zone, MAX_ZONES>,
}

impl Default for PhysMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysMemory {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            zones: ArrayVec::new_const(),
        }
    }

    /// Builds the zones from a bootstrap memory map.
    ///
    /// Coalesces the map's free entries into maximal contiguous runs;
    /// every run becomes one zone whose descriptor array is allocated out
    /// of the map, preferably inside the run it describes (anywhere free
    /// otherwise). Afterwards every byte the map still holds as free is
    /// released into its zone.
    ///
    /// Reserved map entries stay outside the zones entirely; the
    /// descriptor arrays this very function allocates are covered by
    /// their zone but never enter a freelist.
    ///
    /// # Safety
    ///
    /// The free ranges of `map` must describe memory that is present,
    /// writable, and unused: descriptor arrays are constructed in place at
    /// addresses taken from the map.
    pub unsafe fn setup<const CAP: usize>(
        &mut self,
        map: &mut MemoryMap<CAP>,
    ) -> Result<(), SetupError> {
        let mut runs = ArrayVec::<Range<usize>, MAX_ZONES>::new();
        for range in map.iter() {
            if range.status != MemoryStatus::Free {
                continue;
            }
            match runs.last_mut() {
                Some(run) if run.end == range.begin => run.end = range.end,
                _ => runs.try_push(range.begin..range.end).map_err(|_| {
                    ZoneTableFullSnafu {
                        begin: range.begin,
                        end: range.end,
                    }
                    .build()
                })?,
            }
        }

        for run in runs {
            unsafe {
                self.create_zone(run.start, run.end, map)?;
            }
        }
        self.release_free_ranges(map)
    }

    /// Creates one zone for `[begin, end)`, carving its descriptors out of
    /// the map.
    unsafe fn create_zone<const CAP: usize>(
        &mut self,
        begin: usize,
        end: usize,
        map: &mut MemoryMap<CAP>,
    ) -> Result<(), SetupError> {
        let begin = begin.page_align_up();
        let end = end.page_align_down();
        if begin >= end {
            return Ok(());
        }

        let pages = (end - begin) >> PAGE_BITS;
        let bytes = pages * size_of::<Page>();

        // Keep the descriptors inside the region they describe when
        // possible; any free region works as a fallback.
        let addr = map
            .allocate_in(begin, end, bytes, PAGE_SIZE)
            .or_else(|| map.allocate(bytes, PAGE_SIZE))
            .context(DescriptorAllocSnafu { begin, end, bytes })?;

        let descriptors = unsafe {
            let ptr = ptr::with_exposed_provenance_mut::<Page>(addr);
            for index in 0..pages {
                ptr.add(index).write(Page::new());
            }
            slice::from_raw_parts_mut(ptr, pages)
        };

        ensure!(
            !self.zones.is_full(),
            ZoneTableFullSnafu { begin, end }
        );
        self.zones.push(Zone::new(descriptors, begin, end));
        Ok(())
    }

    /// Releases every range the map still holds free into its zone.
    fn release_free_ranges<const CAP: usize>(
        &mut self,
        map: &MemoryMap<CAP>,
    ) -> Result<(), SetupError> {
        let mut zones = self.zones.iter_mut();
        let mut zone = zones.next();

        for range in map.iter() {
            if range.status != MemoryStatus::Free {
                continue;
            }

            let begin = range.begin.page_align_up();
            let end = range.end.page_align_down();
            if begin >= end {
                continue;
            }

            while zone.as_ref().is_some_and(|z| z.to_addr() <= begin) {
                zone = zones.next();
            }

            let released = zone
                .as_mut()
                .is_some_and(|zone| zone.release_range(begin, end));
            ensure!(released, OrphanRangeSnafu { begin, end });
        }
        Ok(())
    }

    /// The zones, in registration order.
    #[must_use]
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Allocates a run of `2^order` pages from the first zone that has one.
    pub fn allocate_pages(&mut self, order: usize) -> Option<PageBlock> {
        if order > MAX_ORDER {
            return None;
        }

        for (index, zone) in self.zones.iter_mut().enumerate() {
            if let Some(page) = zone.allocate_pages(order) {
                return Some(PageBlock {
                    addr: zone.page_addr(page),
                    zone: index as u32,
                    order: order as u32,
                });
            }
        }
        None
    }

    /// Allocates the smallest power-of-two run holding `size` bytes.
    ///
    /// Zero-sized requests and requests beyond `2^MAX_ORDER` pages yield
    /// `None`.
    pub fn allocate_bytes(&mut self, size: usize) -> Option<PageBlock> {
        if size == 0 || size > (PAGE_SIZE << MAX_ORDER) {
            return None;
        }

        let order = size
            .next_power_of_two()
            .trailing_zeros()
            .saturating_sub(PAGE_BITS) as usize;
        self.allocate_pages(order)
    }

    /// Returns a block to its zone.
    pub fn free(&mut self, block: PageBlock) {
        self.zones[block.zone_index()].free_pages_at(block.addr(), block.order());
    }

    /// Total bytes covered by all zones.
    #[must_use]
    pub fn total(&self) -> usize {
        self.zones
            .iter()
            .map(|zone| zone.total_pages() << PAGE_BITS)
            .sum()
    }

    /// Bytes currently sitting on the buddy freelists.
    #[must_use]
    pub fn available(&self) -> usize {
        self.zones
            .iter()
            .map(|zone| zone.available_pages() << PAGE_BITS)
            .sum()
    }
}
