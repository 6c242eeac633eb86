//! Lock-free SPSC ring buffer with element-at-a-time and vectored access.
//!
//! A wait-free bounded ring shared by exactly two parties. Positions wrap in
//! `[0, CAP)` and one slot is reserved to tell empty from full, so the
//! effective capacity is `CAP - 1`.
//!
//! # Overview
//!
//! - [`Producer`] - write end (single producer per ring)
//! - [`Consumer`] - read end (single consumer per ring)
//! - Lock-free, wait-free: no mutexes or syscalls in the hot path
//! - Vectored access: [`Producer::fill`] and [`Consumer::drain`] hand the
//!   callback up to two contiguous windows per call, covering a wraparound
//!
//! # Example
//!
//! ```
//! use carousel::ring;
//!
//! let (producer, consumer) = ring::channel::<u64, 1024>();
//!
//! // Producer thread
//! producer.push(42).expect("ring full");
//!
//! // Consumer thread
//! assert_eq!(consumer.pop(), Some(42));
//! ```
//!
//! # Ordering
//!
//! Each side reads its own position relaxed (it is the sole writer), reads
//! the counter-party position with acquire, and publishes its advanced
//! position with release. Values observed by the consumer are therefore
//! exactly the values the producer published, in order.
//!
//! # Callbacks
//!
//! Position advancement is unconditional once a callback has been entered:
//! a batch is considered processed even if the callback unwinds, and on the
//! consumer side the elements of the window are still destroyed. Callbacks
//! should not panic; failure signaling belongs in state the callback
//! captures.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cell::{Arena, ConsumerCache, PhantomUnsync, ProducerCache};
use crate::clock::TscClock;
use crate::hint::spin_hint;

/// Timeout specification for the blocking convenience wrappers.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Producer-side state: position and cached counter-party position.
#[repr(C)]
#[repr(align(64))]
struct ProducerState {
    /// Producer position in `[0, CAP)`: the next slot to fill.
    /// Owned by the producer, read by the consumer.
    head: AtomicUsize,

    /// Cached copy of the consumer position, refreshed only when the ring
    /// looks full through the cache.
    cached_tail: ProducerCache<usize>,
}

impl ProducerState {
    const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            cached_tail: ProducerCache::new(0),
        }
    }
}

/// Consumer-side state: position and cached counter-party position.
#[repr(C)]
#[repr(align(64))]
struct ConsumerState {
    /// Consumer position in `[0, CAP)`: the oldest live slot.
    /// Owned by the consumer, read by the producer.
    tail: AtomicUsize,

    /// Cached copy of the producer position, refreshed only when the ring
    /// looks empty through the cache.
    cached_head: ConsumerCache<usize>,
}

impl ConsumerState {
    const fn new() -> Self {
        Self {
            tail: AtomicUsize::new(0),
            cached_head: ConsumerCache::new(0),
        }
    }
}

/// Shared ring state: two cache-line-aligned position words and the arena.
#[repr(C)]
struct Ring<T, const CAP: usize> {
    producer: ProducerState,
    consumer: ConsumerState,

    /// Prevent false sharing between consumer state and the arena.
    _padding: [u8; 64],

    arena: Arena<T, CAP>,
}

struct CapacityCheck<const CAP: usize>;

impl<const CAP: usize> CapacityCheck<CAP> {
    /// Compile-time assertion that one slot can be reserved to tell empty
    /// from full.
    const OK: () = assert!(CAP >= 2, "ring capacity must be at least 2");
}

struct BatchCheck<const CAP: usize, const MAX: usize>;

impl<const CAP: usize, const MAX: usize> BatchCheck<CAP, MAX> {
    /// Compile-time assertion that a batch bound fits the effective capacity.
    const OK: () = assert!(MAX <= CAP - 1, "batch bound must leave the reserved slot");
}

/// `pos + 1`, wrapping to 0 at capacity, without a division.
#[inline]
const fn wrap_next<const CAP: usize>(pos: usize) -> usize {
    let next = pos + 1;
    if next == CAP { 0 } else { next }
}

/// `pos + n` for `n <= CAP`, wrapped into `[0, CAP)`.
#[inline]
const fn wrap_add<const CAP: usize>(pos: usize, n: usize) -> usize {
    let sum = pos + n;
    if sum >= CAP { sum - CAP } else { sum }
}

/// Number of live elements for a position snapshot.
#[inline]
const fn live_between<const CAP: usize>(tail: usize, head: usize) -> usize {
    if head >= tail {
        head - tail
    } else {
        head + CAP - tail
    }
}

impl<T, const CAP: usize> Ring<T, CAP> {
    fn new() -> Self {
        Self {
            producer: ProducerState::new(),
            consumer: ConsumerState::new(),
            _padding: [0u8; 64],
            arena: Arena::new(),
        }
    }

    /// Attempts to construct `item` in the next producer slot.
    ///
    /// # Safety
    ///
    /// Caller is the single producer; no concurrent producer-side access.
    #[inline]
    unsafe fn push(&self, item: T) -> Result<(), T> {
        let head = self.producer.head.load(Ordering::Relaxed);
        let next = wrap_next::<CAP>(head);

        // SAFETY: the producer has exclusive access to its cache cell.
        let mut tail = unsafe { *self.producer.cached_tail.get().get() };
        if next == tail {
            tail = self.consumer.tail.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *self.producer.cached_tail.get().get() = tail };
            if next == tail {
                return Err(item);
            }
        }

        // SAFETY: the slot at `head` is vacant: the full check keeps the
        // producer from reaching the consumer position, and the advanced
        // position has not been published yet.
        unsafe { self.arena.construct(head, item) };
        self.producer.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Attempts to move the oldest live element out.
    ///
    /// # Safety
    ///
    /// Caller is the single consumer; no concurrent consumer-side access.
    #[inline]
    unsafe fn pop(&self) -> Option<T> {
        let tail = self.consumer.tail.load(Ordering::Relaxed);

        // SAFETY: the consumer has exclusive access to its cache cell.
        let mut head = unsafe { *self.consumer.cached_head.get().get() };
        if head == tail {
            head = self.producer.head.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *self.consumer.cached_head.get().get() = head };
            if head == tail {
                return None;
            }
        }

        // SAFETY: `tail != head`, so the slot at `tail` was published by
        // the producer and is live; the producer cannot reclaim it until
        // the store below.
        let item = unsafe { self.arena.take(tail) };
        self.consumer.tail.store(wrap_next::<CAP>(tail), Ordering::Release);
        Some(item)
    }

    /// Observes the oldest live element in place, then destroys it.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::pop`].
    #[inline]
    unsafe fn take(&self, f: impl FnOnce(&mut T)) -> bool {
        let tail = self.consumer.tail.load(Ordering::Relaxed);

        // SAFETY: the consumer has exclusive access to its cache cell.
        let mut head = unsafe { *self.consumer.cached_head.get().get() };
        if head == tail {
            head = self.producer.head.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *self.consumer.cached_head.get().get() = head };
            if head == tail {
                return false;
            }
        }

        let guard = TakeGuard {
            ring: self,
            index: tail,
            next: wrap_next::<CAP>(tail),
        };
        // SAFETY: live and consumer-owned, as in `pop`.
        f(unsafe { self.arena.slot_mut(tail) });
        drop(guard);
        true
    }

    /// Raw vacant-window batch for the producer.
    ///
    /// # Safety
    ///
    /// Single-producer contract as in [`Self::push`], and the callback must
    /// initialize every slot it is shown, even when it unwinds.
    unsafe fn fill<const MAX: usize>(&self, mut f: impl FnMut(&mut [MaybeUninit<T>])) -> usize {
        let () = BatchCheck::<CAP, MAX>::OK;
        if MAX == 0 {
            return 0;
        }

        let head = self.producer.head.load(Ordering::Relaxed);
        // SAFETY: the producer has exclusive access to its cache cell.
        let mut tail = unsafe { *self.producer.cached_tail.get().get() };
        let mut vacant = CAP - 1 - live_between::<CAP>(tail, head);
        if vacant == 0 {
            tail = self.consumer.tail.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *self.producer.cached_tail.get().get() = tail };
            vacant = CAP - 1 - live_between::<CAP>(tail, head);
            if vacant == 0 {
                return 0;
            }
        }

        let batch = if MAX < vacant { MAX } else { vacant };
        let publish = PublishGuard {
            word: &self.producer.head,
            next: wrap_add::<CAP>(head, batch),
        };
        let straight = CAP - head;
        if batch <= straight {
            // SAFETY: [head, head + batch) is vacant and producer-owned.
            f(unsafe { self.arena.raw_span(head, batch) });
        } else {
            // SAFETY: both halves of the wrapped window are vacant and
            // producer-owned.
            f(unsafe { self.arena.raw_span(head, straight) });
            f(unsafe { self.arena.raw_span(0, batch - straight) });
        }
        drop(publish);
        batch
    }

    /// Safe batched put: constructs up to `MAX` elements from `g`.
    ///
    /// If `g` unwinds, only the fully constructed prefix is published.
    ///
    /// # Safety
    ///
    /// Single-producer contract as in [`Self::push`].
    unsafe fn fill_with<const MAX: usize>(&self, mut g: impl FnMut() -> T) -> usize {
        let () = BatchCheck::<CAP, MAX>::OK;
        if MAX == 0 {
            return 0;
        }

        let head = self.producer.head.load(Ordering::Relaxed);
        // SAFETY: the producer has exclusive access to its cache cell.
        let mut tail = unsafe { *self.producer.cached_tail.get().get() };
        let mut vacant = CAP - 1 - live_between::<CAP>(tail, head);
        if vacant == 0 {
            tail = self.consumer.tail.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *self.producer.cached_tail.get().get() = tail };
            vacant = CAP - 1 - live_between::<CAP>(tail, head);
            if vacant == 0 {
                return 0;
            }
        }

        let batch = if MAX < vacant { MAX } else { vacant };
        let mut guard: FillGuard<'_, CAP> = FillGuard {
            word: &self.producer.head,
            head,
            constructed: 0,
        };
        for i in 0..batch {
            let value = g();
            // SAFETY: vacant and producer-owned per the window computation.
            unsafe { self.arena.construct(wrap_add::<CAP>(head, i), value) };
            guard.constructed = i + 1;
        }
        drop(guard);
        batch
    }

    /// Live-window batch for the consumer. Elements are destroyed in place
    /// after the callback, then the position is published.
    ///
    /// # Safety
    ///
    /// Single-consumer contract as in [`Self::pop`].
    unsafe fn drain<const MAX: usize>(&self, mut f: impl FnMut(&mut [T])) -> usize {
        let () = BatchCheck::<CAP, MAX>::OK;
        if MAX == 0 {
            return 0;
        }

        let tail = self.consumer.tail.load(Ordering::Relaxed);
        // SAFETY: the consumer has exclusive access to its cache cell.
        let mut head = unsafe { *self.consumer.cached_head.get().get() };
        let mut live = live_between::<CAP>(tail, head);
        if live == 0 {
            head = self.producer.head.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *self.consumer.cached_head.get().get() = head };
            live = live_between::<CAP>(tail, head);
            if live == 0 {
                return 0;
            }
        }

        let batch = if MAX < live { MAX } else { live };
        let guard = DrainGuard {
            ring: self,
            tail,
            batch,
            next: wrap_add::<CAP>(tail, batch),
        };
        let straight = CAP - tail;
        if batch <= straight {
            // SAFETY: [tail, tail + batch) is live and consumer-owned.
            f(unsafe { self.arena.live_span(tail, batch) });
        } else {
            // SAFETY: both halves of the wrapped window are live and
            // consumer-owned.
            f(unsafe { self.arena.live_span(tail, straight) });
            f(unsafe { self.arena.live_span(0, batch - straight) });
        }
        drop(guard);
        batch
    }
}

impl<T, const CAP: usize> Drop for Ring<T, CAP> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }
        let head = *self.producer.head.get_mut();
        let tail = *self.consumer.tail.get_mut();
        let live = live_between::<CAP>(tail, head);
        let straight = CAP - tail;
        // SAFETY: `&mut self` means both roles are gone; the live range is
        // exactly [tail, head) modulo CAP.
        unsafe {
            if live <= straight {
                self.arena.destroy_span(tail, live);
            } else {
                self.arena.destroy_span(tail, straight);
                self.arena.destroy_span(0, live - straight);
            }
        }
    }
}

/// Publishes a position word on drop, so a batch advance survives an
/// unwinding callback.
struct PublishGuard<'a> {
    word: &'a AtomicUsize,
    next: usize,
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        self.word.store(self.next, Ordering::Release);
    }
}

/// Publishes the constructed prefix of a `fill_with` batch on drop.
struct FillGuard<'a, const CAP: usize> {
    word: &'a AtomicUsize,
    head: usize,
    constructed: usize,
}

impl<const CAP: usize> Drop for FillGuard<'_, CAP> {
    fn drop(&mut self) {
        self.word.store(
            wrap_add::<CAP>(self.head, self.constructed),
            Ordering::Release,
        );
    }
}

/// Destroys a drained window and publishes the consumer position on drop.
struct DrainGuard<'a, T, const CAP: usize> {
    ring: &'a Ring<T, CAP>,
    tail: usize,
    batch: usize,
    next: usize,
}

impl<T, const CAP: usize> Drop for DrainGuard<'_, T, CAP> {
    fn drop(&mut self) {
        let straight = CAP - self.tail;
        // SAFETY: the window is live and consumer-owned until the position
        // store below publishes it back to the producer.
        unsafe {
            if self.batch <= straight {
                self.ring.arena.destroy_span(self.tail, self.batch);
            } else {
                self.ring.arena.destroy_span(self.tail, straight);
                self.ring.arena.destroy_span(0, self.batch - straight);
            }
        }
        self.ring.consumer.tail.store(self.next, Ordering::Release);
    }
}

/// Destroys the observed element and publishes the consumer position on
/// drop.
struct TakeGuard<'a, T, const CAP: usize> {
    ring: &'a Ring<T, CAP>,
    index: usize,
    next: usize,
}

impl<T, const CAP: usize> Drop for TakeGuard<'_, T, CAP> {
    fn drop(&mut self) {
        // SAFETY: the slot is live and consumer-owned until the position
        // store below publishes it back to the producer.
        unsafe { self.ring.arena.destroy(self.index) };
        self.ring.consumer.tail.store(self.next, Ordering::Release);
    }
}

/// Write end of the ring.
///
/// Only one producer should exist per ring; uniqueness is enforced by
/// construction ([`channel`] hands out exactly one).
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Producer` (no concurrent pushes)
pub struct Producer<T: Send, const CAP: usize> {
    ring: Arc<Ring<T, CAP>>,
    _unsync: PhantomUnsync,
}

/// Read end of the ring.
///
/// Only one consumer should exist per ring. See [`Producer`] for thread
/// safety details (the same semantics apply).
pub struct Consumer<T: Send, const CAP: usize> {
    ring: Arc<Ring<T, CAP>>,
    _unsync: PhantomUnsync,
}

/// Creates a new SPSC ring with `CAP` slots (effective capacity `CAP - 1`).
///
/// Returns a `(Producer, Consumer)` pair; each half can be sent to its own
/// thread.
///
/// # Panics
///
/// Fails to compile if `CAP < 2`.
///
/// # Example
///
/// ```
/// use carousel::ring;
///
/// let (tx, rx) = ring::channel::<String, 16>();
///
/// tx.push("hello".to_string()).unwrap();
/// assert_eq!(rx.pop(), Some("hello".to_string()));
/// ```
#[must_use]
pub fn channel<T: Send, const CAP: usize>() -> (Producer<T, CAP>, Consumer<T, CAP>) {
    let () = CapacityCheck::<CAP>::OK;

    let ring = Arc::new(Ring::new());

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

impl<T: Send, const CAP: usize> Producer<T, CAP> {
    /// Effective capacity: the number of elements the ring can hold.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAP - 1
    }

    /// Attempts to push an item (wait-free).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the ring is full, allowing retry. A full ring
    /// is the normal back-pressure signal, not a failure.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this handle is the single producer by construction.
        unsafe { self.ring.push(item) }
    }

    /// Spins until space is available, then pushes.
    ///
    /// The deadline is measured with the crate's TSC clock; the first
    /// blocking call with a finite timeout triggers clock calibration.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` on timeout.
    pub fn push_blocking(&self, mut item: T, timeout: Timeout) -> Result<(), T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(TscClock::now() + TscClock::scale().duration_to_ticks(d)),
        };
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if let Some(dl) = deadline
                        && TscClock::now() > dl
                    {
                        return Err(item);
                    }
                    spin_hint();
                }
            }
        }
    }

    /// Batched put over raw vacant windows.
    ///
    /// Computes the largest vacant window up to `MAX`, hands it to `f` as
    /// one slice, or two back-to-back slices when it straddles the arena
    /// end, then publishes the advanced position. Returns the window size;
    /// 0 means the ring was full and `f` was not called.
    ///
    /// # Safety
    ///
    /// `f` must initialize every slot of every slice it is handed, even if
    /// it unwinds; the window is published unconditionally.
    pub unsafe fn fill<const MAX: usize>(&self, f: impl FnMut(&mut [MaybeUninit<T>])) -> usize {
        // SAFETY: single producer by construction; the initialization
        // obligation is forwarded to the caller.
        unsafe { self.ring.fill::<MAX>(f) }
    }

    /// Safe batched put: constructs up to `MAX` elements from `g` into the
    /// vacant window and publishes them. Returns the number constructed.
    #[inline]
    pub fn fill_with<const MAX: usize>(&self, g: impl FnMut() -> T) -> usize {
        // SAFETY: this handle is the single producer by construction.
        unsafe { self.ring.fill_with::<MAX>(g) }
    }
}

impl<T: Send, const CAP: usize> Consumer<T, CAP> {
    /// Effective capacity: the number of elements the ring can hold.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAP - 1
    }

    /// Attempts to pop an item (wait-free).
    ///
    /// Returns `None` if the ring is empty. Repeated calls on an empty ring
    /// return `None` without mutating state.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: this handle is the single consumer by construction.
        unsafe { self.ring.pop() }
    }

    /// Spins until an item is available, then pops.
    ///
    /// Returns `None` on timeout. See [`Producer::push_blocking`] for the
    /// deadline clock.
    #[must_use]
    pub fn pop_blocking(&self, timeout: Timeout) -> Option<T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(TscClock::now() + TscClock::scale().duration_to_ticks(d)),
        };
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if let Some(dl) = deadline
                && TscClock::now() > dl
            {
                return None;
            }
            spin_hint();
        }
    }

    /// Observes the oldest element in place, then destroys it.
    ///
    /// For payloads that must not be relocated after construction: the
    /// element stays in its slot while `f` runs and is dropped there
    /// afterwards. Returns `true` when an element was consumed, `false`
    /// when the ring was empty.
    #[inline]
    pub fn take(&self, f: impl FnOnce(&mut T)) -> bool {
        // SAFETY: this handle is the single consumer by construction.
        unsafe { self.ring.take(f) }
    }

    /// Batched take over live windows.
    ///
    /// Computes the largest live window up to `MAX`, hands it to `f` as one
    /// slice, or two back-to-back slices when it straddles the arena end,
    /// destroys the window's elements, and publishes the advanced position.
    /// Returns the window size; 0 means the ring was empty and `f` was not
    /// called.
    #[inline]
    pub fn drain<const MAX: usize>(&self, f: impl FnMut(&mut [T])) -> usize {
        // SAFETY: this handle is the single consumer by construction.
        unsafe { self.ring.drain::<MAX>(f) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_push_pop() {
        let (producer, consumer) = channel::<u64, 8>();

        assert!(producer.push(42).is_ok());
        assert_eq!(consumer.pop(), Some(42));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn fifo_order() {
        let (producer, consumer) = channel::<u64, 16>();

        for i in 0..10 {
            assert!(producer.push(i).is_ok());
        }

        for i in 0..10 {
            assert_eq!(consumer.pop(), Some(i));
        }

        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn one_slot_is_reserved() {
        let (producer, consumer) = channel::<u64, 4>();

        for i in 0..3 {
            assert!(producer.push(i).is_ok(), "failed to push item {i}");
        }

        assert_eq!(producer.push(999), Err(999));

        assert_eq!(consumer.pop(), Some(0));
        assert!(producer.push(3).is_ok());
        assert_eq!(producer.push(1000), Err(1000));
    }

    #[test]
    fn wrapping_preserves_order() {
        let (producer, consumer) = channel::<u64, 4>();

        for round in 0..5 {
            for i in 0..3 {
                assert!(producer.push(round * 10 + i).is_ok());
            }

            for i in 0..3 {
                assert_eq!(consumer.pop(), Some(round * 10 + i));
            }

            assert_eq!(consumer.pop(), None);
        }
    }

    #[test]
    fn take_observes_in_place() {
        let (producer, consumer) = channel::<String, 8>();

        producer.push("hello".to_string()).unwrap();

        let mut seen = String::new();
        assert!(consumer.take(|s| seen.push_str(s)));
        assert_eq!(seen, "hello");
        assert!(!consumer.take(|_| panic!("ring should be empty")));
    }

    #[test]
    fn fill_with_and_drain_round_trip() {
        let (producer, consumer) = channel::<u64, 8>();

        let mut next = 0u64;
        assert_eq!(
            producer.fill_with::<7>(|| {
                let v = next;
                next += 1;
                v
            }),
            7
        );

        let mut seen = Vec::new();
        assert_eq!(consumer.drain::<7>(|span| seen.extend_from_slice(span)), 7);
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
        assert_eq!(consumer.drain::<7>(|_| panic!("ring should be empty")), 0);
    }

    #[test]
    fn send_to_thread() {
        let (producer, consumer) = channel::<u64, 16>();

        let handle = std::thread::spawn(move || {
            for i in 0..10 {
                producer.push(i).unwrap();
            }
        });

        handle.join().unwrap();

        for i in 0..10 {
            assert_eq!(consumer.pop(), Some(i));
        }
    }

    #[test]
    fn concurrent_push_pop_preserves_order() {
        let (producer, consumer) = channel::<u64, 64>();
        let count = 1000u64;

        let producer_handle = std::thread::spawn(move || {
            for i in 0..count {
                while producer.push(i).is_err() {
                    spin_hint();
                }
            }
        });

        let consumer_handle = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(count as usize);
            while received.len() < count as usize {
                if let Some(item) = consumer.pop() {
                    received.push(item);
                } else {
                    spin_hint();
                }
            }
            received
        });

        producer_handle.join().unwrap();
        let received = consumer_handle.join().unwrap();

        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }

    #[test]
    fn non_copy_payload() {
        let (producer, consumer) = channel::<String, 8>();

        producer.push("hello".to_string()).unwrap();
        producer.push("world".to_string()).unwrap();

        assert_eq!(consumer.pop(), Some("hello".to_string()));
        assert_eq!(consumer.pop(), Some("world".to_string()));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn blocking_pop_times_out() {
        let (_producer, consumer) = channel::<u64, 8>();
        assert_eq!(
            consumer.pop_blocking(Timeout::Duration(Duration::from_millis(5))),
            None
        );
    }
}
