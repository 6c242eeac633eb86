//! Role-marked cells and the raw slot arena shared by the ring and the pipeline.
//!
//! A `RoleCell<T, Role>` wraps an `UnsafeCell<T>` with a phantom `Role`
//! parameter. The role does not affect runtime behavior; it exists purely to
//! make different logical kinds of cells into distinct types at compile time.
//!
//! An `Arena<T, CAP>` is a fixed array of raw, `T`-aligned slots behind a
//! single interior-mutability boundary. Slots move through three states:
//! vacant, live (a `T` has been constructed in place), and consumed (vacant
//! again from the next writer's view). The arena never constructs or destroys
//! values on its own; the owning protocol drives every transition through the
//! explicit construct / take / destroy operations below.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;

/// Role marker: fields with this role are owned exclusively by the producer.
pub struct ProducerRole;

/// Role marker: fields with this role are owned exclusively by the consumer.
pub struct ConsumerRole;

/// Role marker: arena slots whose ownership transfers via the position protocol.
pub struct SlotRole;

/// Interior-mutable cell with a role marker for nominal type safety.
#[repr(transparent)]
pub struct RoleCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T, Role> RoleCell<T, Role> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    pub const fn get(&self) -> &UnsafeCell<T> {
        &self.0
    }
}

// SAFETY: RoleCell is Sync because every cell is written by exactly one
// role at a time; the atomic position words with Release/Acquire ordering
// provide the synchronization barrier between writers and readers.
unsafe impl<T: Send, Role> Sync for RoleCell<T, Role> {}
unsafe impl<T: Send, Role> Send for RoleCell<T, Role> {}

/// Cache cell owned exclusively by the producer.
pub type ProducerCache<T> = RoleCell<T, ProducerRole>;

/// Cache cell owned exclusively by the consumer.
pub type ConsumerCache<T> = RoleCell<T, ConsumerRole>;

/// Marker type to opt out of `Sync` while remaining `Send`.
pub type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Fixed array of `CAP` raw slots, each `size_of::<T>()` bytes at
/// `align_of::<T>()`, behind one interior-mutability boundary.
///
/// All operations take `&self`: concurrent roles hold windows into disjoint
/// index ranges, and disjointness is guaranteed by the caller's position
/// protocol, not by this type.
#[repr(transparent)]
pub struct Arena<T, const CAP: usize>(RoleCell<[MaybeUninit<T>; CAP], SlotRole>);

impl<T, const CAP: usize> Arena<T, CAP> {
    /// Creates an arena of vacant slots.
    pub fn new() -> Self {
        // SAFETY: an array of MaybeUninit does not require initialization.
        Self(RoleCell::new(unsafe {
            MaybeUninit::<[MaybeUninit<T>; CAP]>::uninit().assume_init()
        }))
    }

    #[inline]
    fn base(&self) -> *mut MaybeUninit<T> {
        self.0.get().get().cast()
    }

    /// Constructs a value in place, making the slot live.
    ///
    /// # Safety
    ///
    /// `index < CAP`, the slot is vacant, and the caller holds write
    /// ownership of it under the position protocol.
    #[inline]
    pub unsafe fn construct(&self, index: usize, value: T) {
        // SAFETY: in-bounds per the caller contract; the slot is not aliased.
        unsafe { (*self.base().add(index)).write(value) };
    }

    /// Returns a mutable reference to the live value in a slot.
    ///
    /// # Safety
    ///
    /// `index < CAP`, the slot is live, and the caller holds exclusive
    /// ownership of it for the lifetime of the reference.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, index: usize) -> &mut T {
        // SAFETY: in-bounds and initialized per the caller contract.
        unsafe { (*self.base().add(index)).assume_init_mut() }
    }

    /// Moves the value out of a live slot, leaving it vacant.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::slot_mut`]; the slot must not be read as
    /// live again until reconstructed.
    #[inline]
    pub unsafe fn take(&self, index: usize) -> T {
        // SAFETY: in-bounds and initialized per the caller contract.
        unsafe { self.base().add(index).cast::<T>().read() }
    }

    /// Drops the value in a live slot in place, leaving it vacant.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::take`].
    #[inline]
    pub unsafe fn destroy(&self, index: usize) {
        // SAFETY: in-bounds and initialized per the caller contract.
        unsafe { self.base().add(index).cast::<T>().drop_in_place() };
    }

    /// Returns a raw window of `len` slots starting at `start`.
    ///
    /// # Safety
    ///
    /// `start + len <= CAP` and the caller holds write ownership of the
    /// whole range; no other reference to the range may exist while the
    /// returned slice is alive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn raw_span(&self, start: usize, len: usize) -> &mut [MaybeUninit<T>] {
        // SAFETY: in-bounds and exclusively owned per the caller contract.
        unsafe { std::slice::from_raw_parts_mut(self.base().add(start), len) }
    }

    /// Returns a window of `len` live values starting at `start`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::raw_span`], and every slot in the range is
    /// live.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn live_span(&self, start: usize, len: usize) -> &mut [T] {
        // SAFETY: in-bounds, initialized, and exclusively owned per the
        // caller contract.
        unsafe { std::slice::from_raw_parts_mut(self.base().add(start).cast::<T>(), len) }
    }

    /// Drops `len` live values in place starting at `start`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::live_span`].
    #[inline]
    pub unsafe fn destroy_span(&self, start: usize, len: usize) {
        // SAFETY: the range is live and exclusively owned per the caller
        // contract.
        unsafe {
            std::ptr::slice_from_raw_parts_mut(self.base().add(start).cast::<T>(), len)
                .drop_in_place();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_take_round_trip() {
        let arena = Arena::<String, 4>::new();
        // SAFETY: single-threaded access to disjoint vacant/live slots.
        unsafe {
            arena.construct(0, "hello".to_string());
            arena.construct(3, "world".to_string());
            assert_eq!(arena.slot_mut(0).as_str(), "hello");
            assert_eq!(arena.take(3), "world");
            arena.destroy(0);
        }
    }

    #[test]
    fn spans_cover_expected_indices() {
        let arena = Arena::<u64, 8>::new();
        // SAFETY: single-threaded; the raw span is initialized before the
        // live span reads it.
        unsafe {
            let span = arena.raw_span(5, 3);
            assert_eq!(span.len(), 3);
            for (i, slot) in span.iter_mut().enumerate() {
                slot.write(i as u64);
            }
            assert_eq!([0u64, 1, 2], arena.live_span(5, 3));
            arena.destroy_span(5, 3);
        }
    }
}
