//! N-stage pipeline over a shared circular arena.
//!
//! Generalizes the SPSC ring to `N >= 2` cooperating stages arranged in a
//! ring: stage `i` consumes slots released by stage `(i - 1) % N` and
//! produces for stage `(i + 1) % N`. One stage is designated the first; its
//! upstream neighbor is the last. Elements are constructed when the first
//! stage visits a slot and destroyed when the last stage is done with it.
//!
//! # Overview
//!
//! - [`stages`] - builds the arena and returns one [`Stage`] handle per stage
//! - [`Stage::invoke_obj`] - per-element batch with automatic construction
//!   at the first stage and destruction at the last
//! - [`Stage::invoke_mem`] - raw-window batch, one or two spans per call
//! - [`Stage::invoke_single`] - element-at-a-time variant
//!
//! Unlike the two-party ring, no slot is reserved: a caught-up flag packed
//! into the high bit of each position word tells "neighbor at my position
//! because there is nothing new" from "neighbor at my position because it
//! wrapped all the way around", so batches of the full arena are legal.
//!
//! # Example
//!
//! ```
//! use carousel::pipeline;
//!
//! let [source, transform, sink] = pipeline::stages::<u64, 16, 3>();
//!
//! // Each handle moves to its own thread; here everything runs inline.
//! assert_eq!(source.invoke_obj::<16>(|slot| *slot = 7), 16);
//! assert_eq!(transform.invoke_obj::<16>(|slot| *slot += 1), 16);
//! let mut sum = 0;
//! assert_eq!(sink.invoke_obj::<16>(|slot| sum += *slot), 16);
//! assert_eq!(sum, 8 * 16);
//! ```
//!
//! # Caught-up protocol
//!
//! Each stage owns one atomic word: position in the low bits, caught-up
//! flag in the high bit. A stage that consumes everything its upstream has
//! released flags the upstream word caught-up with a CAS; the upstream's
//! next advance overwrites the flag. A failed CAS means the upstream moved
//! concurrently, which is new work, not an error. At construction every
//! flag is set except the last stage's, so only the first stage can act;
//! its advance wakes the second, and so on around the ring.
//!
//! # Callbacks
//!
//! As with the ring, a batch advance is published even when the callback
//! unwinds. The object flavor publishes the fully processed prefix; the
//! element in flight at the moment of a panic stays in the arena and may be
//! leaked or re-presented. Callbacks should not panic.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cell::{Arena, PhantomUnsync};

/// Caught-up flag, packed into the high bit of every stage position word so
/// position and flag publish atomically together.
const CAUGHT_UP: usize = 1 << (usize::BITS - 1);

/// `pos + n` for `n <= CAP`, wrapped into `[0, CAP)`.
#[inline]
const fn wrap_add<const CAP: usize>(pos: usize, n: usize) -> usize {
    let sum = pos + n;
    if sum >= CAP { sum - CAP } else { sum }
}

/// One stage's position word on its own cache line.
#[repr(C)]
#[repr(align(64))]
struct StageWord {
    /// Low bits: position in `[0, CAP)`. High bit: caught-up flag.
    /// Written by the owning stage; the flag alone may be set by the
    /// downstream stage via CAS.
    pos: AtomicUsize,
}

impl StageWord {
    const fn new() -> Self {
        Self {
            pos: AtomicUsize::new(CAUGHT_UP),
        }
    }
}

struct PipelineCheck<const CAP: usize, const N: usize>;

impl<const CAP: usize, const N: usize> PipelineCheck<CAP, N> {
    const OK: () = {
        assert!(N >= 2, "a pipeline needs at least two stages");
        assert!(CAP >= 1, "arena capacity must be at least 1");
        assert!(CAP < 1 << (usize::BITS - 1), "capacity must leave the flag bit free");
    };
}

struct BatchCheck<const CAP: usize, const MAX: usize>;

impl<const CAP: usize, const MAX: usize> BatchCheck<CAP, MAX> {
    /// Compile-time assertion that a batch bound fits the arena.
    const OK: () = assert!(MAX <= CAP, "batch bound cannot exceed the arena");
}

/// Shared pipeline state: one position word per stage and the arena.
#[repr(C)]
struct Shared<T, const CAP: usize, const N: usize> {
    stages: [StageWord; N],
    first: usize,

    /// Prevent false sharing between the word array and the arena.
    _padding: [u8; 64],

    arena: Arena<T, CAP>,
}

impl<T, const CAP: usize, const N: usize> Shared<T, CAP, N> {
    fn new(first: usize) -> Self {
        assert!(first < N, "first stage index out of range");
        let shared = Self {
            stages: std::array::from_fn(|_| StageWord::new()),
            first,
            _padding: [0u8; 64],
            arena: Arena::new(),
        };
        // Bootstrap: only the last stage starts with the flag clear, so the
        // first stage sees the whole arena and wakes the others in turn.
        shared.stages[last_of::<N>(first)].pos.store(0, Ordering::Relaxed);
        shared
    }
}

#[inline]
const fn last_of<const N: usize>(first: usize) -> usize {
    if first == 0 { N - 1 } else { first - 1 }
}

impl<T, const CAP: usize, const N: usize> Drop for Shared<T, CAP, N> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }
        let first = self.first;
        let last = last_of::<N>(first);
        let last_word = *self.stages[last].pos.get_mut();
        let p_first = *self.stages[first].pos.get_mut() & !CAUGHT_UP;
        let p_last = last_word & !CAUGHT_UP;
        // The last stage's flag set means the first stage wrapped fully
        // onto it: every slot is live. Otherwise the live range runs from
        // the last stage's position to the first stage's.
        let live = if last_word & CAUGHT_UP != 0 {
            CAP
        } else if p_first >= p_last {
            p_first - p_last
        } else {
            p_first + CAP - p_last
        };
        let straight = CAP - p_last;
        // SAFETY: `&mut self` means all stage handles are gone; elements
        // are constructed by the object flavor exactly once per pass and
        // destroyed at the last stage, so [p_last, p_last + live) is the
        // live range.
        unsafe {
            if live <= straight {
                self.arena.destroy_span(p_last, live);
            } else {
                self.arena.destroy_span(p_last, straight);
                self.arena.destroy_span(0, live - straight);
            }
        }
    }
}

/// Flags the upstream word caught-up (when the whole window was consumed)
/// and publishes the stage position on drop, so a batch advance survives an
/// unwinding callback.
struct AdvanceGuard<'a, const CAP: usize> {
    own: &'a AtomicUsize,
    upstream: &'a AtomicUsize,
    upstream_snapshot: usize,
    base: usize,
    completed: usize,
    drained_upstream: bool,
}

impl<const CAP: usize> Drop for AdvanceGuard<'_, CAP> {
    fn drop(&mut self) {
        if self.drained_upstream {
            // The upstream word still reads as the snapshot unless the
            // upstream advanced concurrently; in that case there is more
            // work to see on the next call and the flag must stay clear.
            let _ = self.upstream.compare_exchange(
                self.upstream_snapshot,
                self.upstream_snapshot | CAUGHT_UP,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
        // Publishing the advanced position also clears this stage's own
        // caught-up flag, which is what resumes the downstream stage.
        self.own.store(
            wrap_add::<CAP>(self.base, self.completed),
            Ordering::Release,
        );
    }
}

/// Handle to one stage of a pipeline.
///
/// Exactly one handle exists per stage; it is [`Send`] but not [`Sync`],
/// so each stage runs on at most one thread at a time.
pub struct Stage<T: Send, const CAP: usize, const N: usize> {
    shared: Arc<Shared<T, CAP, N>>,
    index: usize,
    _unsync: PhantomUnsync,
}

/// Builds a pipeline with stage 0 designated first.
///
/// Returns one handle per stage, in stage order; each handle can be sent to
/// its own thread.
///
/// # Panics
///
/// Fails to compile if `N < 2` or `CAP < 1`.
#[must_use]
pub fn stages<T: Send, const CAP: usize, const N: usize>() -> [Stage<T, CAP, N>; N] {
    stages_with_first(0)
}

/// Builds a pipeline with an arbitrary stage designated first.
///
/// The stage at `first` constructs elements; its upstream neighbor
/// `(first - 1) % N` destroys them.
///
/// # Panics
///
/// Panics if `first >= N`. Fails to compile if `N < 2` or `CAP < 1`.
#[must_use]
pub fn stages_with_first<T: Send, const CAP: usize, const N: usize>(
    first: usize,
) -> [Stage<T, CAP, N>; N] {
    let () = PipelineCheck::<CAP, N>::OK;

    let shared = Arc::new(Shared::new(first));
    std::array::from_fn(|index| Stage {
        shared: Arc::clone(&shared),
        index,
        _unsync: PhantomData,
    })
}

impl<T: Send, const CAP: usize, const N: usize> Stage<T, CAP, N> {
    /// This stage's index in `[0, N)`.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether this stage constructs elements.
    #[inline]
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.index == self.shared.first
    }

    /// Whether this stage destroys elements.
    #[inline]
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.index == last_of::<N>(self.shared.first)
    }

    /// Arena capacity; pipeline batches may cover all of it.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    #[inline]
    fn upstream_index(&self) -> usize {
        if self.index == 0 { N - 1 } else { self.index - 1 }
    }

    /// Snapshot of the window this stage may act on: `(base, available,
    /// upstream snapshot)`, or `None` when the upstream is drained.
    #[inline]
    fn window(&self) -> Option<(usize, usize, usize)> {
        let snapshot = self.shared.stages[self.upstream_index()]
            .pos
            .load(Ordering::Acquire);
        if snapshot & CAUGHT_UP != 0 {
            return None;
        }
        let own = self.shared.stages[self.index].pos.load(Ordering::Relaxed) & !CAUGHT_UP;
        let upstream = snapshot;
        // Equal positions with the flag clear mean the upstream wrapped
        // the whole arena ahead of this stage.
        let available = if upstream > own {
            upstream - own
        } else {
            upstream + CAP - own
        };
        Some((own, available, snapshot))
    }

    /// Raw-window batch.
    ///
    /// Computes the largest span of slots released by the upstream stage,
    /// up to `MAX`, hands it to `f` as one slice, or two back-to-back
    /// slices when it straddles the arena end, then publishes the advanced
    /// position. Returns the window size; 0 means nothing was released and
    /// `f` was not called.
    ///
    /// # Safety
    ///
    /// The memory discipline is the caller's: slots hold whatever bytes the
    /// upstream left there, a first-stage callback must leave every slot it
    /// is shown initialized (even when unwinding, as the window is
    /// published unconditionally), and mixing this flavor with
    /// [`Self::invoke_obj`] for payloads that own resources forfeits the
    /// automatic lifecycle.
    pub unsafe fn invoke_mem<const MAX: usize>(
        &self,
        mut f: impl FnMut(&mut [MaybeUninit<T>]),
    ) -> usize {
        let () = BatchCheck::<CAP, MAX>::OK;
        if MAX == 0 {
            return 0;
        }
        let Some((base, available, snapshot)) = self.window() else {
            return 0;
        };

        let batch = if MAX < available { MAX } else { available };
        let guard = AdvanceGuard::<CAP> {
            own: &self.shared.stages[self.index].pos,
            upstream: &self.shared.stages[self.upstream_index()].pos,
            upstream_snapshot: snapshot,
            base,
            completed: batch,
            drained_upstream: batch == available,
        };
        let straight = CAP - base;
        if batch <= straight {
            // SAFETY: [base, base + batch) was released by the upstream and
            // is owned by this stage until the guard publishes.
            f(unsafe { self.shared.arena.raw_span(base, batch) });
        } else {
            // SAFETY: both halves of the wrapped window are owned by this
            // stage, as above.
            f(unsafe { self.shared.arena.raw_span(base, straight) });
            f(unsafe { self.shared.arena.raw_span(0, batch - straight) });
        }
        drop(guard);
        batch
    }

    /// Per-element batch with automatic lifecycle.
    ///
    /// Same windowing as [`Self::invoke_mem`], but `f` sees one `&mut T`
    /// per slot. The first stage constructs a default `T` in the slot
    /// before each call; the last stage destroys the element after it
    /// (skipped entirely when `T` has no drop glue); intermediate stages
    /// neither construct nor destroy. Returns the number of elements
    /// processed.
    pub fn invoke_obj<const MAX: usize>(&self, mut f: impl FnMut(&mut T)) -> usize
    where
        T: Default,
    {
        let () = BatchCheck::<CAP, MAX>::OK;
        if MAX == 0 {
            return 0;
        }
        let Some((base, available, snapshot)) = self.window() else {
            return 0;
        };

        let batch = if MAX < available { MAX } else { available };
        let first = self.is_first();
        let last = self.is_last() && std::mem::needs_drop::<T>();
        let mut guard = AdvanceGuard::<CAP> {
            own: &self.shared.stages[self.index].pos,
            upstream: &self.shared.stages[self.upstream_index()].pos,
            upstream_snapshot: snapshot,
            base,
            completed: 0,
            drained_upstream: false,
        };
        for k in 0..batch {
            let slot = wrap_add::<CAP>(base, k);
            if first {
                // SAFETY: the slot was drained by the last stage (or never
                // used) and is owned by this stage until published.
                unsafe { self.shared.arena.construct(slot, T::default()) };
            }
            // SAFETY: the slot is live (constructed above or by a previous
            // first-stage pass) and owned by this stage.
            f(unsafe { self.shared.arena.slot_mut(slot) });
            if last {
                // SAFETY: as above; downstream of the last stage is the
                // first, which only reuses the slot after reconstruction.
                unsafe { self.shared.arena.destroy(slot) };
            }
            guard.completed = k + 1;
        }
        guard.drained_upstream = batch == available;
        drop(guard);
        batch
    }

    /// Element-at-a-time variant of [`Self::invoke_obj`].
    ///
    /// Returns `true` when an element was processed, `false` when the
    /// upstream had released nothing.
    pub fn invoke_single(&self, f: impl FnOnce(&mut T)) -> bool
    where
        T: Default,
    {
        let mut f = Some(f);
        self.invoke_obj::<1>(|value| {
            if let Some(f) = f.take() {
                f(value);
            }
        }) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_stage_starts_with_work() {
        let [s0, s1] = stages::<u64, 8, 2>();

        assert_eq!(s1.invoke_obj::<8>(|_| {}), 0);
        assert_eq!(s0.invoke_obj::<8>(|slot| *slot = 1), 8);
        assert_eq!(s1.invoke_obj::<8>(|slot| assert_eq!(*slot, 1)), 8);
    }

    #[test]
    fn values_flow_in_stage_order() {
        let [source, transform, sink] = stages::<u64, 4, 3>();

        assert_eq!(sink.invoke_obj::<4>(|_| {}), 0);
        assert_eq!(transform.invoke_obj::<4>(|_| {}), 0);

        let mut next = 0u64;
        assert_eq!(
            source.invoke_obj::<4>(|slot| {
                *slot = next;
                next += 1;
            }),
            4
        );
        assert_eq!(transform.invoke_obj::<4>(|slot| *slot *= 10), 4);

        let mut seen = Vec::new();
        assert_eq!(sink.invoke_obj::<4>(|slot| seen.push(*slot)), 4);
        assert_eq!(seen, vec![0, 10, 20, 30]);
    }

    #[test]
    fn invoke_single_round_robin() {
        let [s0, s1] = stages::<u64, 2, 2>();

        assert!(!s1.invoke_single(|_| {}));
        assert!(s0.invoke_single(|slot| *slot = 41));
        assert!(s1.invoke_single(|slot| assert_eq!(*slot, 41)));
    }

    #[test]
    fn first_stage_can_be_designated() {
        let [s0, s1, s2] = stages_with_first::<u64, 8, 3>(1);

        assert!(s1.is_first());
        assert!(s0.is_last());
        assert!(!s2.is_first() && !s2.is_last());

        assert_eq!(s0.invoke_obj::<8>(|_| {}), 0);
        assert_eq!(s1.invoke_obj::<8>(|slot| *slot = 9), 8);
        assert_eq!(s2.invoke_obj::<8>(|slot| assert_eq!(*slot, 9)), 8);
        assert_eq!(s0.invoke_obj::<8>(|slot| assert_eq!(*slot, 9)), 8);
    }

    #[test]
    fn handles_move_to_threads() {
        let [s0, s1] = stages::<u64, 64, 2>();
        let count = 1000u64;

        let producer = std::thread::spawn(move || {
            let mut next = 0u64;
            while next < count {
                s0.invoke_obj::<64>(|slot| {
                    *slot = next;
                    next += 1;
                });
            }
        });

        let consumer = std::thread::spawn(move || {
            let mut expected = 0u64;
            while expected < count {
                s1.invoke_obj::<64>(|slot| {
                    assert_eq!(*slot, expected);
                    expected += 1;
                });
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
