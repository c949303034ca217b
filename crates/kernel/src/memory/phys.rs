//! The process-wide physical allocator and its owning handle.

use core::ops::Range;

use palloc::phys::{PageBlock, PhysMemory, SetupError};
use range_map::MemoryMap;

use crate::spinlock::SpinMutex;

static PHYS: SpinMutex<PhysMemory> = SpinMutex::new(PhysMemory::new());

/// Bootstraps the zones out of the memory map. Called exactly once.
///
/// # Safety
///
/// The free ranges of `map` must describe present, writable, unused
/// memory; see [`PhysMemory::setup`].
///
/// # Panics
///
/// Panics when called a second time.
pub unsafe fn setup_allocator<const CAP: usize>(
    map: &mut MemoryMap<CAP>,
) -> Result<(), SetupError> {
    let mut phys = PHYS.lock();
    assert!(phys.zones().is_empty(), "physical allocator set up twice");
    unsafe { phys.setup(map) }
}

pub(crate) fn with_phys<R>(f: impl FnOnce(&mut PhysMemory) -> R) -> R {
    f(&mut PHYS.lock())
}

/// Allocates the smallest power-of-two page run holding `size` bytes.
///
/// Returns `None` for zero sizes, oversized requests, and exhaustion.
pub fn allocate_physical(size: usize) -> Option<PhysBox> {
    let block = PHYS.lock().allocate_bytes(size)?;
    Some(PhysBox(Some(block)))
}

/// Bytes covered by the allocator, free or not.
pub fn total_physical() -> usize {
    PHYS.lock().total()
}

/// Bytes currently allocatable.
pub fn available_physical() -> usize {
    PHYS.lock().available()
}

/// Owning handle to a physical page run; the run is freed on drop.
///
/// Movable, never copyable: exactly one `PhysBox` names an allocation.
pub struct PhysBox(Option<PageBlock>);

impl PhysBox {
    /// Physical address of the first byte.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.0.as_ref().map_or(0, PageBlock::addr)
    }

    /// Size of the run in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.as_ref().map_or(0, PageBlock::size)
    }

    /// The covered address interval.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.0.as_ref().map_or(0..0, PageBlock::range)
    }

    /// Gives up ownership without freeing; the memory leaks unless the
    /// block is eventually handed back to the allocator.
    #[must_use]
    pub fn leak(mut self) -> Option<PageBlock> {
        self.0.take()
    }
}

impl Drop for PhysBox {
    fn drop(&mut self) {
        if let Some(block) = self.0.take() {
            PHYS.lock().free(block);
        }
    }
}
