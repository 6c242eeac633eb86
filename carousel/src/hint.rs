//! Idle primitive for busy-spinning callers.

/// Emits a CPU pause hint (`PAUSE` on x86) for spin-wait loops.
///
/// None of the primitives in this crate block; when a call reports no work,
/// the caller decides the back-off policy. This is the recommended idle
/// primitive for tight spins; callers with mixed workloads can layer a
/// condvar or park on top without affecting correctness.
#[inline]
pub fn spin_hint() {
    std::hint::spin_loop();
}
