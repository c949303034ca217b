//! Turning the device tree into the bootstrap memory map.

use range_map::{MemoryMap, MemoryStatus};
use snafu::{ResultExt as _, Snafu, ensure};

#[derive(Debug, Snafu)]
pub enum BootstrapError {
    #[snafu(display("failed to walk memory nodes: {source}"))]
    MemoryNodes {
        #[snafu(source)]
        source: fdt::MemoryWalkError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("cannot register memory range {begin:#x}..{end:#x}"))]
    RegisterRange {
        begin: usize,
        end: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("cannot reserve firmware range {begin:#x}..{end:#x}"))]
    ReserveRange {
        begin: usize,
        end: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Registers every `memory` node range as free, then reserves every
/// `/memreserve/` entry on top.
pub fn memory_map_from_dtb<const CAP: usize>(
    fdt: &fdt::Fdt<'_>,
    map: &mut MemoryMap<CAP>,
) -> Result<(), BootstrapError> {
    let mut conflict = None;
    fdt::memory_regions(fdt, &mut |region| {
        if conflict.is_some() {
            return;
        }
        let begin = region.address as usize;
        let end = begin.saturating_add(region.size as usize);
        if !map.register(begin, end, MemoryStatus::Free) {
            conflict = Some((begin, end));
        }
    })
    .context(MemoryNodesSnafu)?;
    if let Some((begin, end)) = conflict {
        return RegisterRangeSnafu { begin, end }.fail();
    }

    for entry in fdt.reserved_entries() {
        let range = entry.range();
        let begin = range.start as usize;
        let end = range.end as usize;
        ensure!(map.reserve(begin, end), ReserveRangeSnafu { begin, end });
    }
    Ok(())
}
