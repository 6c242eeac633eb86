//! Cache-aware, lock-free building blocks for low-latency handoff between
//! threads.
//!
//! # Components
//!
//! - [`ring`] - single-producer/single-consumer ring buffer with
//!   element-at-a-time and vectored (scatter-over-wraparound) access
//! - [`pipeline`] - N-stage generalization: N cooperating threads advance a
//!   shared circular arena in strict upstream-to-downstream order
//! - [`clock`] - TSC-based high-resolution clock, self-calibrated once per
//!   process against the OS monotonic clock
//!
//! No component spawns threads or blocks: the caller supplies one thread
//! per role or stage, and calls that find no work return immediately so the
//! caller owns the back-off policy (see [`spin_hint`]).
//!
//! # Example
//!
//! ```
//! use carousel::ring;
//!
//! let (tx, rx) = ring::channel::<u64, 256>();
//! std::thread::spawn(move || {
//!     for i in 0..100 {
//!         while tx.push(i).is_err() {
//!             carousel::spin_hint();
//!         }
//!     }
//! });
//! let mut received = 0;
//! while received < 100 {
//!     if let Some(value) = rx.pop() {
//!         assert_eq!(value, received);
//!         received += 1;
//!     }
//! }
//! ```

mod cell;
mod hint;
mod trace;

pub mod clock;
pub mod pipeline;
pub mod ring;

pub use hint::spin_hint;
pub use trace::init_tracing;

/// Alignment target for position words, matching the L1 data cache line on
/// the supported targets. The `align` attributes across the crate use this
/// value as a literal.
pub const CACHE_LINE_SIZE: usize = 64;
