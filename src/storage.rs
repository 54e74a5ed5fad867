//! Storage strategies for singleton instances.
//!
//! Small singletons live in a `static` declared next to their definition, so
//! they cost no allocation. Types larger than [`HEAP_THRESHOLD`] get one heap
//! block instead, which keeps them out of the binary's static data.
//!
//! The choice is made at compile time through [`Placement`] and [`Select`]:
//!
//! ```rust
//! use singleton_vault::storage::{is_heap_allocated, Memory, Placement, Select};
//!
//! type Slot =
//!     <Placement<{ is_heap_allocated(std::mem::size_of::<u64>()) }> as Select<u64>>::Memory;
//! static SLOT: Slot = <Slot as Memory<u64>>::EMPTY;
//! # let _ = &SLOT;
//! ```

use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::singleton::fatal;

/// Instances strictly larger than this many bytes are heap allocated.
pub const HEAP_THRESHOLD: usize = 1024 * 1024;

/// Returns `true` when an instance of `size` bytes goes to the heap.
pub const fn is_heap_allocated(size: usize) -> bool {
    size > HEAP_THRESHOLD
}

/// Memory for exactly one `T`.
///
/// # Safety
///
/// `acquire` must return memory that is valid and aligned for `T` until the
/// matching `release`. Callers serialize `acquire`/`release` pairs; the vault
/// does this through the entry lock.
pub unsafe trait Memory<T>: Sync + 'static {
    /// Empty storage, usable as a `static` initializer.
    const EMPTY: Self;

    /// Returns the region to construct the instance in.
    fn acquire(&self) -> NonNull<MaybeUninit<T>>;

    /// Gives the region back.
    ///
    /// # Safety
    ///
    /// Any instance constructed in the region must already be dropped, and
    /// the pointer returned by `acquire` must not be used afterwards.
    unsafe fn release(&self);
}

/// Storage reserved in process memory; `release` is a no-op.
pub struct StaticMemory<T> {
    memory: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: the cell is only written through the pointer handed out by
// `acquire`, under the entry lock.
unsafe impl<T: Send + Sync> Sync for StaticMemory<T> {}

unsafe impl<T: Send + Sync + 'static> Memory<T> for StaticMemory<T> {
    const EMPTY: Self = StaticMemory {
        memory: UnsafeCell::new(MaybeUninit::uninit()),
    };

    fn acquire(&self) -> NonNull<MaybeUninit<T>> {
        // SAFETY: UnsafeCell::get never returns null.
        unsafe { NonNull::new_unchecked(self.memory.get()) }
    }

    unsafe fn release(&self) {}
}

/// Storage backed by a single heap block per acquire.
pub struct HeapMemory<T> {
    block: AtomicPtr<MaybeUninit<T>>,
    _marker: PhantomData<T>,
}

// SAFETY: the block is owned by this storage and only reached through
// `acquire`/`release`.
unsafe impl<T: Send + Sync> Sync for HeapMemory<T> {}

unsafe impl<T: Send + Sync + 'static> Memory<T> for HeapMemory<T> {
    const EMPTY: Self = HeapMemory {
        block: AtomicPtr::new(ptr::null_mut()),
        _marker: PhantomData,
    };

    fn acquire(&self) -> NonNull<MaybeUninit<T>> {
        let layout = Layout::new::<T>();
        if layout.size() == 0 {
            return NonNull::dangling();
        }

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) }.cast::<MaybeUninit<T>>();
        let Some(block) = NonNull::new(raw) else {
            fatal(&format_args!(
                "couldn't allocate {} bytes for the singleton instance {}",
                layout.size(),
                std::any::type_name::<T>()
            ));
        };

        self.block.store(block.as_ptr(), Ordering::Release);
        block
    }

    unsafe fn release(&self) {
        let block = self.block.swap(ptr::null_mut(), Ordering::AcqRel);
        if !block.is_null() {
            alloc::dealloc(block.cast(), Layout::new::<T>());
        }
    }
}

#[cfg(test)]
impl<T> HeapMemory<T> {
    pub(crate) fn is_allocated(&self) -> bool {
        !self.block.load(Ordering::Acquire).is_null()
    }
}

/// Compile-time choice between [`StaticMemory`] and [`HeapMemory`].
pub struct Placement<const HEAP: bool>;

/// Maps a [`Placement`] to its storage type for `T`.
pub trait Select<T> {
    type Memory: Memory<T>;
}

impl<T: Send + Sync + 'static> Select<T> for Placement<false> {
    type Memory = StaticMemory<T>;
}

impl<T: Send + Sync + 'static> Select<T> for Placement<true> {
    type Memory = HeapMemory<T>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        assert!(!is_heap_allocated(0));
        assert!(!is_heap_allocated(HEAP_THRESHOLD));
        assert!(is_heap_allocated(HEAP_THRESHOLD + 1));
    }

    #[test]
    fn test_placement_selects_by_size() {
        use std::mem::size_of;

        type Bytes = [u8; 2 * HEAP_THRESHOLD];
        type Small = <Placement<{ is_heap_allocated(size_of::<u32>()) }> as Select<u32>>::Memory;
        type Large =
            <Placement<{ is_heap_allocated(size_of::<Bytes>()) }> as Select<Bytes>>::Memory;

        assert_eq!(
            std::any::type_name::<Small>(),
            std::any::type_name::<StaticMemory<u32>>()
        );
        assert_eq!(
            std::any::type_name::<Large>(),
            std::any::type_name::<HeapMemory<Bytes>>()
        );
    }

    #[test]
    fn test_static_memory_is_stable() {
        static SLOT: StaticMemory<u64> = <StaticMemory<u64> as Memory<u64>>::EMPTY;

        let first = SLOT.acquire();
        // SAFETY: nothing was constructed in the slot.
        unsafe { SLOT.release() };
        let second = SLOT.acquire();
        assert_eq!(first, second);
        assert_eq!(first.as_ptr() as usize % std::mem::align_of::<u64>(), 0);
    }

    #[test]
    fn test_heap_memory_acquire_release() {
        #[repr(align(64))]
        struct Aligned([u8; 128]);

        let memory = <HeapMemory<Aligned> as Memory<Aligned>>::EMPTY;
        let block = memory.acquire();
        assert_eq!(block.as_ptr() as usize % 64, 0);
        assert_eq!(memory.block.load(Ordering::Acquire), block.as_ptr());

        // SAFETY: nothing was constructed in the block.
        unsafe { memory.release() };
        assert!(memory.block.load(Ordering::Acquire).is_null());

        // releasing twice is harmless
        unsafe { memory.release() };
    }
}
