//! Extraction of RAM ranges from the devicetree.
//!
//! Walks the structure block at root level, picking up `#address-cells`
//! and `#size-cells` from the root node (both default to 2), and decodes
//! the `reg` property of every node whose name starts with `memory`. Each
//! `reg` entry is an `(address, size)` pair whose field widths follow the
//! cell counts; 1- and 2-cell widths are supported in any combination.

use snafu::{ResultExt as _, Snafu, ensure};

use crate::{Fdt, Token, lexer::LexError};

/// One `(address, size)` pair out of a `memory` node's `reg` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub address: u64,
    pub size: u64,
}

/// Errors from walking the memory nodes.
#[derive(Debug, Snafu)]
pub enum MemoryWalkError {
    #[snafu(display("malformed structure block: {source}"))]
    Structure {
        #[snafu(source)]
        source: LexError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("unsupported cell widths: #address-cells={address_cells}, #size-cells={size_cells}"))]
    UnsupportedCellWidth {
        address_cells: u32,
        size_cells: u32,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("cell count property holds {len} bytes instead of 4"))]
    MalformedCellCount {
        len: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("reg property of {len} bytes is not a whole number of entries"))]
    MalformedReg {
        len: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Reports every `memory` node's `reg` ranges to `sink`.
///
/// Regions are reported in devicetree order; empty regions are reported
/// as-is and left to the caller to ignore.
pub fn memory_regions(
    fdt: &Fdt<'_>,
    sink: &mut dyn FnMut(MemoryRegion),
) -> Result<(), MemoryWalkError> {
    let mut address_cells = 2_u32;
    let mut size_cells = 2_u32;
    let mut depth = 0_usize;
    let mut in_memory_node = false;

    for token in fdt.tokens() {
        match token.context(StructureSnafu)? {
            Token::BeginNode { name } => {
                depth += 1;
                // Children of the root; deeper nodes are never RAM.
                in_memory_node = depth == 2 && name.starts_with("memory");
            }
            Token::EndNode => {
                depth = depth.saturating_sub(1);
                in_memory_node = false;
            }
            Token::Prop { name, value } if depth == 1 => match name {
                "#address-cells" => address_cells = read_cell_count(value)?,
                "#size-cells" => size_cells = read_cell_count(value)?,
                _ => {}
            },
            Token::Prop { name, value } if in_memory_node && name == "reg" => {
                read_regions(value, address_cells, size_cells, sink)?;
            }
            Token::Prop { .. } | Token::Nop => {}
            Token::End => break,
        }
    }
    Ok(())
}

fn read_cell_count(value: &[u8]) -> Result<u32, MemoryWalkError> {
    let cells: [u8; 4] = value
        .try_into()
        .map_err(|_| MalformedCellCountSnafu { len: value.len() }.build())?;
    Ok(u32::from_be_bytes(cells))
}

fn read_regions(
    value: &[u8],
    address_cells: u32,
    size_cells: u32,
    sink: &mut dyn FnMut(MemoryRegion),
) -> Result<(), MemoryWalkError> {
    ensure!(
        (1..=2).contains(&address_cells) && (1..=2).contains(&size_cells),
        UnsupportedCellWidthSnafu {
            address_cells,
            size_cells,
        }
    );

    let entry_bytes = (address_cells + size_cells) as usize * 4;
    ensure!(
        value.len().is_multiple_of(entry_bytes),
        MalformedRegSnafu { len: value.len() }
    );

    for entry in value.chunks_exact(entry_bytes) {
        let (address, rest) = read_cells(entry, address_cells);
        let (size, _) = read_cells(rest, size_cells);
        sink(MemoryRegion { address, size });
    }
    Ok(())
}

fn read_cells(bytes: &[u8], cells: u32) -> (u64, &[u8]) {
    let (raw, rest) = bytes.split_at(cells as usize * 4);
    let mut value = 0_u64;
    for cell in raw.chunks_exact(4) {
        let cell = u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]);
        value = (value << 32) | u64::from(cell);
    }
    (value, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::BlobBuilder;

    fn collect(fdt: &Fdt<'_>) -> Vec<MemoryRegion> {
        let mut regions = Vec::new();
        memory_regions(fdt, &mut |region| regions.push(region)).unwrap();
        regions
    }

    fn reg_2_2(entries: &[(u64, u64)]) -> Vec<u8> {
        let mut value = Vec::new();
        for &(address, size) in entries {
            value.extend_from_slice(&address.to_be_bytes());
            value.extend_from_slice(&size.to_be_bytes());
        }
        value
    }

    #[test]
    fn test_two_cell_regions() {
        let mut builder = BlobBuilder::new();
        builder
            .begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("memory@40000000")
            .prop("device_type", b"memory\0")
            .prop(
                "reg",
                &reg_2_2(&[(0x4000_0000, 0x1000_0000), (0x6000_0000, 0x800_0000)]),
            )
            .end_node()
            .end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();

        assert_eq!(
            collect(&fdt),
            vec![
                MemoryRegion {
                    address: 0x4000_0000,
                    size: 0x1000_0000,
                },
                MemoryRegion {
                    address: 0x6000_0000,
                    size: 0x800_0000,
                },
            ]
        );
    }

    #[test]
    fn test_one_cell_regions() {
        let mut value = Vec::new();
        value.extend_from_slice(&0x8000_0000_u32.to_be_bytes());
        value.extend_from_slice(&0x0400_0000_u32.to_be_bytes());

        let mut builder = BlobBuilder::new();
        builder
            .begin_node("")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .begin_node("memory")
            .prop("reg", &value)
            .end_node()
            .end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();

        assert_eq!(
            collect(&fdt),
            vec![MemoryRegion {
                address: 0x8000_0000,
                size: 0x0400_0000,
            }]
        );
    }

    #[test]
    fn test_mixed_cell_widths() {
        let mut value = Vec::new();
        value.extend_from_slice(&0x1_2000_0000_u64.to_be_bytes());
        value.extend_from_slice(&0x1000_0000_u32.to_be_bytes());

        let mut builder = BlobBuilder::new();
        builder
            .begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 1)
            .begin_node("memory@120000000")
            .prop("reg", &value)
            .end_node()
            .end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();

        assert_eq!(
            collect(&fdt),
            vec![MemoryRegion {
                address: 0x1_2000_0000,
                size: 0x1000_0000,
            }]
        );
    }

    #[test]
    fn test_cells_default_to_two() {
        let mut builder = BlobBuilder::new();
        builder
            .begin_node("")
            .begin_node("memory@40000000")
            .prop("reg", &reg_2_2(&[(0x4000_0000, 0x1000)]))
            .end_node()
            .end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();

        assert_eq!(
            collect(&fdt),
            vec![MemoryRegion {
                address: 0x4000_0000,
                size: 0x1000,
            }]
        );
    }

    #[test]
    fn test_non_memory_nodes_are_skipped() {
        let mut builder = BlobBuilder::new();
        builder
            .begin_node("")
            .begin_node("soc")
            // A `reg` on a non-memory node, and a nested decoy.
            .prop("reg", &reg_2_2(&[(0xdead_0000, 0x1000)]))
            .begin_node("memory-controller@9000000")
            .prop("reg", &reg_2_2(&[(0x900_0000, 0x1000)]))
            .end_node()
            .end_node()
            .begin_node("memory@40000000")
            .prop("reg", &reg_2_2(&[(0x4000_0000, 0x1000)]))
            .end_node()
            .end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();

        assert_eq!(
            collect(&fdt),
            vec![MemoryRegion {
                address: 0x4000_0000,
                size: 0x1000,
            }]
        );
    }

    #[test]
    fn test_unsupported_cell_width() {
        let mut builder = BlobBuilder::new();
        builder
            .begin_node("")
            .prop_u32("#address-cells", 3)
            .begin_node("memory")
            .prop("reg", &[0; 16])
            .end_node()
            .end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();

        let result = memory_regions(&fdt, &mut |_| {});
        assert!(matches!(
            result,
            Err(MemoryWalkError::UnsupportedCellWidth { .. })
        ));
    }

    #[test]
    fn test_malformed_reg() {
        let mut builder = BlobBuilder::new();
        builder
            .begin_node("")
            .begin_node("memory")
            .prop("reg", &[0; 10])
            .end_node()
            .end_node();
        let fdt = Fdt::from_bytes(builder.finish()).unwrap();

        let result = memory_regions(&fdt, &mut |_| {});
        assert!(matches!(result, Err(MemoryWalkError::MalformedReg { .. })));
    }
}
