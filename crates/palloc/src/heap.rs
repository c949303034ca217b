//! The general-purpose allocator: size classes over slab caches, buddy
//! for everything bigger.
//!
//! Requests are bucketed by `request + header` into 32 classes of 128-byte
//! steps (128, 256, …, 4096), each served by its own [`Cache`]. Anything
//! past the last class goes straight to the buddy allocator. Either way a
//! fixed-size [`Header`] precedes the returned pointer, recording which
//! cache or which buddy block the memory came from, so `free` needs
//! nothing but the pointer.

use core::{array, ptr};

use crate::{
    phys::{PageBlock, PhysMemory},
    slab::Cache,
};

/// Granularity of the size classes.
pub const CLASS_STEP: usize = 128;

/// Number of size classes; the largest class is `CLASS_STEP * CLASS_COUNT`.
pub const CLASS_COUNT: usize = 32;

/// Strictest alignment the allocator guarantees for returned pointers.
pub const MAX_ALIGN: usize = 32;

/// Provenance record stored immediately below every returned pointer.
#[repr(C, align(32))]
struct Header {
    backing: Backing,
}

enum Backing {
    /// Index of the size-class cache the allocation came from.
    Class(usize),
    /// The buddy block backing an allocation past the last class.
    Block(PageBlock),
}

const HEADER_SIZE: usize = size_of::<Header>();
const _: () = assert!(HEADER_SIZE == MAX_ALIGN);

/// The size-class allocator.
///
/// Instance-based like the rest of the crate: the kernel owns one behind
/// its lock and passes the physical allocator into every call that may
/// grow or shrink the backing memory.
pub struct Heap {
    caches: [Cache; CLASS_COUNT],
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Creates the 32 class caches. No memory is taken until first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            caches: array::from_fn(|index| {
                let class = (index + 1) * CLASS_STEP;
                Cache::new(class, class)
            }),
        }
    }

    fn class_for(total: usize) -> Option<usize> {
        let index = total / CLASS_STEP;
        (index < CLASS_COUNT).then_some(index)
    }

    /// Allocates `size` bytes, aligned to [`MAX_ALIGN`].
    ///
    /// Zero-sized requests yield `None`.
    pub fn allocate(&mut self, phys: &mut PhysMemory, size: usize) -> Option<*mut u8> {
        if size == 0 {
            return None;
        }
        let total = size.checked_add(HEADER_SIZE)?;

        let (base, backing) = if let Some(index) = Self::class_for(total) {
            (self.caches[index].allocate(phys)?, Backing::Class(index))
        } else {
            let block = phys.allocate_bytes(total)?;
            let base = ptr::with_exposed_provenance_mut::<u8>(block.addr());
            (base, Backing::Block(block))
        };

        unsafe {
            base.cast::<Header>().write(Header { backing });
            Some(base.add(HEADER_SIZE))
        }
    }

    /// Frees an allocation.
    ///
    /// Freeing null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from
    /// [`allocate`](Self::allocate)/[`reallocate`](Self::reallocate) on
    /// this heap, not freed since; `phys` must be the allocator the heap
    /// grew from.
    pub unsafe fn free(&mut self, phys: &mut PhysMemory, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        unsafe {
            let base = ptr.sub(HEADER_SIZE);
            let header = base.cast::<Header>().read();
            match header.backing {
                Backing::Class(index) => {
                    let freed = self.caches[index].free(base);
                    debug_assert!(freed);
                }
                Backing::Block(block) => phys.free(block),
            }
        }
    }

    /// Resizes an allocation, moving it only when the current backing is
    /// too small.
    ///
    /// On success the returned pointer supersedes `ptr`. On failure the
    /// original allocation is untouched and still owned by the caller.
    /// A null `ptr` degenerates to [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](Self::free).
    pub unsafe fn reallocate(
        &mut self,
        phys: &mut PhysMemory,
        ptr: *mut u8,
        new_size: usize,
    ) -> Option<*mut u8> {
        if ptr.is_null() {
            return self.allocate(phys, new_size);
        }
        let total = new_size.checked_add(HEADER_SIZE)?;

        unsafe {
            let base = ptr.sub(HEADER_SIZE);
            let capacity = match (*base.cast::<Header>()).backing {
                Backing::Class(index) => self.caches[index].object_size(),
                Backing::Block(ref block) => block.size(),
            };
            if capacity >= total {
                return Some(ptr);
            }

            let new_ptr = self.allocate(phys, new_size)?;
            ptr::copy_nonoverlapping(ptr, new_ptr, (capacity - HEADER_SIZE).min(new_size));
            self.free(phys, ptr);
            Some(new_ptr)
        }
    }

    /// Returns every empty slab in every class back to the buddy.
    pub fn reclaim(&mut self, phys: &mut PhysMemory) -> bool {
        let mut reclaimed = false;
        for cache in &mut self.caches {
            reclaimed |= cache.reclaim(phys);
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use std::alloc::{self, Layout};

    use range_map::{MemoryMap, MemoryStatus};

    use super::*;
    use crate::PAGE_SIZE;

    fn with_heap<F>(bytes: usize, test: F)
    where
        F: FnOnce(&mut Heap, &mut PhysMemory),
    {
        let layout = Layout::from_size_align(bytes, PAGE_SIZE).unwrap();
        let buffer = unsafe { alloc::alloc(layout) };
        assert!(!buffer.is_null());
        let base = buffer.expose_provenance();

        let mut map = MemoryMap::<128>::new();
        assert!(map.register(base, base + bytes, MemoryStatus::Free));

        let mut phys = PhysMemory::new();
        unsafe {
            phys.setup(&mut map).unwrap();
        }

        let mut heap = Heap::new();
        test(&mut heap, &mut phys);
        heap.reclaim(&mut phys);
    }

    #[test]
    fn test_class_for() {
        assert_eq!(Heap::class_for(0), Some(0));
        assert_eq!(Heap::class_for(127), Some(0));
        assert_eq!(Heap::class_for(128), Some(1));
        assert_eq!(Heap::class_for(4095), Some(31));
        assert_eq!(Heap::class_for(4096), None);
    }

    #[test]
    fn test_small_allocation_goes_through_a_cache() {
        with_heap(1 << 22, |heap, phys| {
            let before = phys.available();
            let ptr = heap.allocate(phys, 200).unwrap();
            assert!(ptr.addr().is_multiple_of(MAX_ALIGN));
            unsafe {
                ptr.write_bytes(0x33, 200);
            }

            // 200 + 32 lands in the 256 class; one of its one-page slabs
            // is the only thing taken from the buddy.
            assert_eq!(phys.available(), before - 4096);

            unsafe {
                heap.free(phys, ptr);
            }
            heap.reclaim(phys);
            assert_eq!(phys.available(), before);
        });
    }

    #[test]
    fn test_large_allocation_bypasses_caches() {
        with_heap(1 << 23, |heap, phys| {
            let before = phys.available();
            let ptr = heap.allocate(phys, 1 << 20).unwrap();
            unsafe {
                ptr.write_bytes(0x44, 1 << 20);
            }

            // 1 MiB + header rounds up to an order-9 buddy block.
            assert_eq!(phys.available(), before - (1 << 21));

            unsafe {
                heap.free(phys, ptr);
            }
            assert_eq!(phys.available(), before);
        });
    }

    #[test]
    fn test_boundary_between_classes_and_buddy() {
        with_heap(1 << 22, |heap, phys| {
            let before = phys.available();

            // total == 4095: still the last class.
            let small = heap.allocate(phys, 4095 - HEADER_SIZE).unwrap();
            let class_slab = 65536; // slab size of the 4096 class
            assert_eq!(phys.available(), before - class_slab);

            // total == 4096: first size routed to the buddy.
            let large = heap.allocate(phys, 4096 - HEADER_SIZE).unwrap();
            assert_eq!(phys.available(), before - class_slab - 4096);

            unsafe {
                heap.free(phys, small);
                heap.free(phys, large);
            }
            heap.reclaim(phys);
            assert_eq!(phys.available(), before);
        });
    }

    #[test]
    fn test_zero_size_allocation() {
        with_heap(1 << 20, |heap, phys| {
            assert!(heap.allocate(phys, 0).is_none());
        });
    }

    #[test]
    fn test_free_null_is_noop() {
        with_heap(1 << 20, |heap, phys| {
            unsafe {
                heap.free(phys, ptr::null_mut());
            }
        });
    }

    #[test]
    fn test_data_survives_neighbouring_churn() {
        with_heap(1 << 22, |heap, phys| {
            let keeper = heap.allocate(phys, 300).unwrap();
            unsafe {
                for offset in 0..300 {
                    keeper.add(offset).write((offset % 251) as u8);
                }
            }

            let churn: Vec<_> = (0..64)
                .map(|_| heap.allocate(phys, 300).unwrap())
                .collect();
            for ptr in churn {
                unsafe {
                    ptr.write_bytes(0xee, 300);
                    heap.free(phys, ptr);
                }
            }

            unsafe {
                for offset in 0..300 {
                    assert_eq!(keeper.add(offset).read(), (offset % 251) as u8);
                }
                heap.free(phys, keeper);
            }
        });
    }

    #[test]
    fn test_reallocate_within_backing_keeps_pointer() {
        with_heap(1 << 22, |heap, phys| {
            let ptr = heap.allocate(phys, 100).unwrap();
            // 100 + 32 lands in the 256 class, which fits 150 + 32 too.
            let grown = unsafe { heap.reallocate(phys, ptr, 150) }.unwrap();
            assert_eq!(grown, ptr);

            unsafe {
                heap.free(phys, grown);
            }
        });
    }

    #[test]
    fn test_reallocate_moves_and_copies() {
        with_heap(1 << 22, |heap, phys| {
            let ptr = heap.allocate(phys, 100).unwrap();
            unsafe {
                for offset in 0..100 {
                    ptr.add(offset).write(offset as u8);
                }
            }

            let grown = unsafe { heap.reallocate(phys, ptr, 10_000) }.unwrap();
            assert_ne!(grown, ptr);
            unsafe {
                for offset in 0..100 {
                    assert_eq!(grown.add(offset).read(), offset as u8);
                }
                heap.free(phys, grown);
            }
        });
    }

    #[test]
    fn test_reallocate_failure_keeps_original() {
        with_heap(1 << 18, |heap, phys| {
            let ptr = heap.allocate(phys, 100).unwrap();
            unsafe {
                ptr.write_bytes(0x5a, 100);
            }

            // Far larger than the pool: the grow fails, the original stays.
            let result = unsafe { heap.reallocate(phys, ptr, 1 << 30) };
            assert!(result.is_none());
            unsafe {
                for offset in 0..100 {
                    assert_eq!(ptr.add(offset).read(), 0x5a);
                }
                heap.free(phys, ptr);
            }
        });
    }

    #[test]
    fn test_reallocate_null_allocates() {
        with_heap(1 << 20, |heap, phys| {
            let ptr = unsafe { heap.reallocate(phys, ptr::null_mut(), 64) }.unwrap();
            unsafe {
                heap.free(phys, ptr);
            }
        });
    }
}
