//! The process-wide general-purpose allocator.

use core::ptr;

use palloc::heap::Heap;

use super::phys;
use crate::spinlock::SpinMutex;

static HEAP: SpinMutex<Option<Heap>> = SpinMutex::new(None);

/// Creates the size-class caches. Called once, after the physical
/// allocator is up.
pub(crate) fn init() {
    let mut heap = HEAP.lock();
    assert!(heap.is_none(), "heap set up twice");
    *heap = Some(Heap::new());
}

/// Allocates `size` bytes aligned to [`palloc::heap::MAX_ALIGN`].
///
/// Returns null for zero sizes, exhaustion, or before [`init`].
pub fn allocate(size: usize) -> *mut u8 {
    let mut heap = HEAP.lock();
    let Some(heap) = heap.as_mut() else {
        return ptr::null_mut();
    };
    phys::with_phys(|phys| heap.allocate(phys, size)).unwrap_or(ptr::null_mut())
}

/// Frees an allocation; null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or have come from [`allocate`]/[`reallocate`] and
/// not been freed since.
pub unsafe fn free(ptr: *mut u8) {
    let mut heap = HEAP.lock();
    let Some(heap) = heap.as_mut() else {
        return;
    };
    phys::with_phys(|phys| unsafe { heap.free(phys, ptr) });
}

/// Resizes an allocation, moving it only when it no longer fits.
///
/// Returns null on failure, leaving the original allocation valid.
///
/// # Safety
///
/// Same contract as [`free`].
pub unsafe fn reallocate(ptr: *mut u8, new_size: usize) -> *mut u8 {
    let mut heap = HEAP.lock();
    let Some(heap) = heap.as_mut() else {
        return ptr::null_mut();
    };
    phys::with_phys(|phys| unsafe { heap.reallocate(phys, ptr, new_size) })
        .unwrap_or(ptr::null_mut())
}

#[cfg(not(test))]
mod global {
    use core::alloc::{GlobalAlloc, Layout};

    use palloc::heap::MAX_ALIGN;

    struct KernelAllocator;

    #[global_allocator]
    static ALLOCATOR: KernelAllocator = KernelAllocator;

    unsafe impl GlobalAlloc for KernelAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            // The heap guarantees nothing past the header alignment;
            // refuse rather than hand out misaligned memory.
            if layout.align() > MAX_ALIGN {
                return core::ptr::null_mut();
            }
            super::allocate(layout.size())
        }

        unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
            unsafe { super::free(ptr) }
        }
    }
}
