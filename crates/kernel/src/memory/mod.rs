//! Memory bootstrap and the exported allocation API.
//!
//! The boot path runs [`init`]: mount the device tree, build the
//! [`range_map::MemoryMap`] from it, reserve the kernel image and the
//! blob itself, then bootstrap the buddy zones and the size-class heap.
//! Afterwards the map's job is done; everything allocates through the
//! singletons in [`phys`] and [`heap`].

pub mod bootstrap;
pub mod heap;
#[cfg(not(test))]
pub mod layout;
pub mod phys;

pub use palloc::{PAGE_BITS, PAGE_SIZE};

/// Number of ranges the bootstrap memory map can hold.
pub const MEMORY_MAP_CAPACITY: usize = 128;

#[cfg(not(test))]
pub use self::init::{InitError, init};

#[cfg(not(test))]
mod init {
    use range_map::MemoryMap;
    use snafu::{ResultExt as _, Snafu, ensure};

    use super::{MEMORY_MAP_CAPACITY, bootstrap, heap, layout, phys};

    #[derive(Debug, Snafu)]
    pub enum InitError {
        #[snafu(display("cannot mount device tree: {source}"))]
        Dtb {
            #[snafu(source)]
            source: fdt::FdtError,
            #[snafu(implicit)]
            location: snafu::Location,
        },
        #[snafu(display("cannot build memory map: {source}"))]
        Bootstrap {
            #[snafu(source)]
            source: bootstrap::BootstrapError,
            #[snafu(implicit)]
            location: snafu::Location,
        },
        #[snafu(display("cannot reserve {what} at {begin:#x}..{end:#x}"))]
        Reserve {
            what: &'static str,
            begin: usize,
            end: usize,
            #[snafu(implicit)]
            location: snafu::Location,
        },
        #[snafu(display("cannot bootstrap the physical allocator: {source}"))]
        Setup {
            #[snafu(source)]
            source: palloc::phys::SetupError,
            #[snafu(implicit)]
            location: snafu::Location,
        },
    }

    /// Brings up the whole allocator stack from the firmware hand-off.
    ///
    /// # Safety
    ///
    /// `dtb_pa` must point to the device tree the firmware handed over,
    /// and the memory it describes must be real and otherwise unused.
    /// Must only be called once, on the boot path.
    pub unsafe fn init(dtb_pa: usize) -> Result<(), InitError> {
        let fdt = unsafe { fdt::Fdt::from_addr(dtb_pa) }.context(DtbSnafu)?;

        let mut map = MemoryMap::<MEMORY_MAP_CAPACITY>::new();
        bootstrap::memory_map_from_dtb(&fdt, &mut map).context(BootstrapSnafu)?;

        let kernel = layout::kernel_image_range();
        ensure!(
            map.reserve(kernel.start, kernel.end),
            ReserveSnafu {
                what: "kernel image",
                begin: kernel.start,
                end: kernel.end,
            }
        );

        let dtb = layout::dtb_range(&fdt);
        ensure!(
            map.reserve(dtb.start, dtb.end),
            ReserveSnafu {
                what: "device tree",
                begin: dtb.start,
                end: dtb.end,
            }
        );

        unsafe {
            phys::setup_allocator(&mut map).context(SetupSnafu)?;
        }
        heap::init();
        Ok(())
    }
}
