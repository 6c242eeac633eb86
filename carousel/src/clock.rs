//! TSC-based high-resolution clock with one-shot self-calibration.
//!
//! Reads the CPU timestamp counter, which is monotonic and far cheaper than
//! a syscall, and converts tick counts into physical durations using a ratio
//! measured once per process against the OS monotonic clock.
//!
//! # Overview
//!
//! - [`TscClock::now`] - serialized counter read, returns a [`TscInstant`]
//! - [`TscClock::scale`] - calibrates on first call, then returns the cached
//!   [`Calibration`]
//! - [`TscClock::ensure_invariant`] - CPUID probe for an invariant TSC
//!
//! # Example
//!
//! ```
//! use carousel::clock::TscClock;
//!
//! let start = TscClock::now();
//! // ... measured section ...
//! let elapsed = TscClock::scale().ticks_to_duration(TscClock::now() - start);
//! println!("took {elapsed:?}");
//! ```
//!
//! # Portability
//!
//! x86_64 is the only architecture with a native counter here. Other targets
//! substitute nanoseconds of `std::time::Instant` as the tick source; the
//! same calibration and conversion surface applies, the ratio just settles
//! at one tick per nanosecond.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::hint::spin_hint;
use crate::trace;

/// Optional CPU frequency hint, read from `CAROUSEL_CPU_HZ_HINT` at compile
/// time. Informational only; calibration never relies on it.
pub const CPU_HZ_HINT: Option<&str> = option_env!("CAROUSEL_CPU_HZ_HINT");

/// Failure modes of the invariant-TSC probe.
///
/// Note that the clock itself never fails; this error only tells a harness
/// that tick-based measurements on this machine may drift with power states.
#[derive(Debug, Error)]
pub enum ClockError {
    /// The CPU does not advertise an invariant TSC (CPUID 0x8000_0007 EDX bit 8).
    #[error("cpu does not advertise an invariant tsc")]
    NonInvariantTsc,
    /// The power-management CPUID leaf is not implemented on this CPU.
    #[error("cpuid leaf 0x8000_0007 unavailable")]
    CpuidUnavailable,
}

/// A point in tick space, as read from the counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TscInstant(u64);

impl TscInstant {
    /// Returns the raw tick count.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }
}

/// A span in tick space (number of ticks between two instants).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TscSpan(u64);

impl TscSpan {
    /// Creates a span from a raw tick count.
    #[inline]
    #[must_use]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Returns the raw tick count.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }
}

impl core::ops::Sub for TscInstant {
    type Output = TscSpan;

    /// `rhs` must not be later than `self`; the counter is monotonic, so
    /// ordering two reads correctly is enough.
    #[inline]
    fn sub(self, rhs: Self) -> TscSpan {
        TscSpan(self.0 - rhs.0)
    }
}

impl core::ops::Add<TscSpan> for TscInstant {
    type Output = Self;

    #[inline]
    fn add(self, rhs: TscSpan) -> Self {
        Self(self.0 + rhs.0)
    }
}

/// The measured tick-to-time ratio, stored as the raw pair it was derived
/// from: a tick delta and the wall-clock duration it covered.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    ticks: u64,
    elapsed: Duration,
    converged: bool,
}

impl Calibration {
    /// Converts a tick span into a physical duration.
    #[inline]
    #[must_use]
    pub fn ticks_to_duration(&self, span: TscSpan) -> Duration {
        Duration::from_nanos((span.0 as u128 * self.elapsed.as_nanos() / self.ticks as u128) as u64)
    }

    /// Converts a physical duration into a tick span.
    #[inline]
    #[must_use]
    pub fn duration_to_ticks(&self, duration: Duration) -> TscSpan {
        TscSpan((duration.as_nanos() * self.ticks as u128 / self.elapsed.as_nanos()) as u64)
    }

    /// Picoseconds per tick, as a float, for reporting.
    #[inline]
    #[must_use]
    pub fn picos_per_tick(&self) -> f64 {
        self.elapsed.as_nanos() as f64 * 1e3 / self.ticks as f64
    }

    /// `false` if calibration hit its iteration cap before the ratio
    /// settled; the estimate is then the last (lowest-error) one observed.
    #[inline]
    #[must_use]
    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// The process-wide TSC clock.
///
/// Steady: instants only move forward, and the tick-to-time ratio is fixed
/// after the first [`TscClock::scale`] call.
pub struct TscClock;

static CALIBRATION: OnceLock<Calibration> = OnceLock::new();

impl TscClock {
    /// Reads the counter.
    ///
    /// The read is bracketed by load fences so instructions from the
    /// measured section cannot be reordered across the sample.
    #[inline]
    #[must_use]
    pub fn now() -> TscInstant {
        TscInstant(read_ticks())
    }

    /// Returns the calibrated tick-to-time ratio.
    ///
    /// The first call across the whole process runs the calibration loop;
    /// concurrent first calls all observe the same result. Later calls
    /// return the cached ratio.
    #[must_use]
    pub fn scale() -> &'static Calibration {
        CALIBRATION.get_or_init(calibrate)
    }

    /// Verifies that the TSC ticks at a constant rate regardless of power
    /// states, via the CPUID power-management leaf.
    ///
    /// Benchmark harnesses should call this once at startup and refuse (or
    /// annotate) tick-based measurements when it fails.
    #[cfg(target_arch = "x86_64")]
    pub fn ensure_invariant() -> Result<(), ClockError> {
        use core::arch::x86_64::{__cpuid, __get_cpuid_max};

        // SAFETY: cpuid is unconditionally available in 64-bit mode.
        let (max_extended, _) = unsafe { __get_cpuid_max(0x8000_0000) };
        if max_extended < 0x8000_0007 {
            return Err(ClockError::CpuidUnavailable);
        }
        // SAFETY: the leaf was just confirmed to be implemented.
        let power = unsafe { __cpuid(0x8000_0007) };
        if power.edx & (1 << 8) != 0 {
            Ok(())
        } else {
            Err(ClockError::NonInvariantTsc)
        }
    }

    /// On non-x86 targets the tick source is the OS monotonic clock, which
    /// is invariant by construction.
    #[cfg(not(target_arch = "x86_64"))]
    pub fn ensure_invariant() -> Result<(), ClockError> {
        Ok(())
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn read_ticks() -> u64 {
    // SAFETY: lfence and rdtsc require no target features beyond x86_64.
    unsafe {
        use core::arch::x86_64::{_mm_lfence, _rdtsc};
        _mm_lfence();
        let ticks = _rdtsc();
        _mm_lfence();
        ticks
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn read_ticks() -> u64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Measures the tick-to-time ratio by timing batches of pause cycles
/// against both the counter and the OS monotonic clock, doubling the batch
/// until the ratio stops moving.
///
/// Two best-effort stops bound the loop: a hard cap on the batch size, and
/// a budget on how long a single round may take (scheduler jitter keeps the
/// round-to-round ratio change above the bound on busy hosts, and the
/// longest round already carries the lowest-error estimate).
fn calibrate() -> Calibration {
    // Relative ratio change between rounds below this counts as settled.
    const RATIO_EPSILON: f64 = 1e-7;
    // Hard cap on the batch size; past it the last estimate is kept.
    const SPIN_CAP: u64 = 1_000_000_000;
    // A round that runs longer than this also keeps the last estimate.
    const ROUND_BUDGET: Duration = Duration::from_millis(100);

    let mut spins: u64 = 1 << 16;
    let mut prev_ratio = f64::NAN;
    loop {
        let wall_start = Instant::now();
        let tsc_start = read_ticks();
        for _ in 0..spins {
            spin_hint();
        }
        let ticks = read_ticks() - tsc_start;
        let elapsed = wall_start.elapsed();

        let ratio = ticks as f64 / elapsed.as_nanos() as f64;
        let settled = ((ratio - prev_ratio) / prev_ratio).abs() < RATIO_EPSILON;
        if settled || spins >= SPIN_CAP || elapsed >= ROUND_BUDGET {
            if !settled {
                trace::warn!(spins, "tsc calibration stopped at its iteration budget");
            }
            trace::debug!(
                ticks,
                elapsed_ns = elapsed.as_nanos() as u64,
                converged = settled,
                "tsc calibration finished"
            );
            return Calibration {
                ticks,
                elapsed,
                converged: settled,
            };
        }
        prev_ratio = ratio;
        spins *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instants_are_monotonic() {
        let mut prev = TscClock::now();
        for _ in 0..1000 {
            let next = TscClock::now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn span_arithmetic() {
        let a = TscInstant(100);
        let b = TscInstant(350);
        assert_eq!((b - a).ticks(), 250);
        assert_eq!(a + TscSpan::from_ticks(250), b);
    }

    #[test]
    fn conversions_use_the_stored_pair() {
        // 3 ticks per nanosecond.
        let cal = Calibration {
            ticks: 3_000_000,
            elapsed: Duration::from_millis(1),
            converged: true,
        };
        assert_eq!(
            cal.ticks_to_duration(TscSpan::from_ticks(3_000)),
            Duration::from_micros(1)
        );
        assert_eq!(
            cal.duration_to_ticks(Duration::from_micros(1)).ticks(),
            3_000
        );
        let picos = cal.picos_per_tick();
        assert!((picos - 1000.0 / 3.0).abs() < 1e-9);
    }
}
