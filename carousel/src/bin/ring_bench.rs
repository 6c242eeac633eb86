//! SPSC ring throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use carousel::clock::{CPU_HZ_HINT, TscClock};
use carousel::ring;
use carousel::spin_hint;

const RING_SIZE: usize = 1 << 12;
const ITERATIONS: usize = 1 << 24;

/// Sequence-and-key probe, the smallest payload of the sweep.
#[derive(Default, Clone, Copy)]
struct ProbeSmall {
    _seq: u64,
    _key: u32,
}

/// Small probe plus a padding tail.
#[derive(Default, Clone, Copy)]
struct ProbePadded {
    _base: ProbeSmall,
    _data: [u8; 8],
}

#[derive(Default, Clone, Copy)]
struct Level {
    _px: i64,
    _qty: i64,
}

#[derive(Default, Clone, Copy)]
struct BookSide {
    _book: [Level; 32],
    _depth: u8,
}

/// Book-shaped probe: two sides of 32 price levels.
#[derive(Default, Clone, Copy)]
struct ProbeBook {
    _seq: u64,
    _key: u32,
    _sides: [BookSide; 2],
}

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_throughput<T: Default + Send + 'static>(
    name: &str,
    producer_cpu: Option<usize>,
    consumer_cpu: Option<usize>,
) {
    let (producer, consumer) = ring::channel::<T, RING_SIZE>();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for _ in 0..ITERATIONS {
            loop {
                if consumer.pop().is_some() {
                    break;
                }
                spin_hint();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        spin_hint();
    }

    pin_to_cpu(producer_cpu);

    let start = TscClock::now();

    for _ in 0..ITERATIONS {
        while producer.push(T::default()).is_err() {
            spin_hint();
        }
    }

    consumer_thread.join().unwrap();
    let elapsed = TscClock::scale().ticks_to_duration(TscClock::now() - start);

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    let gb_per_sec = size_of::<T>() as f64 * ITERATIONS as f64 / elapsed.as_secs_f64() * 1e-9;
    println!("  {name} ({} bytes): {ops_per_ms} ops/ms, {gb_per_sec:.2} GB/s", size_of::<T>());
}

fn bench_throughput_batched(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (producer, consumer) = ring::channel::<u64, RING_SIZE>();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        let mut consumed = 0usize;
        while consumed < ITERATIONS {
            let n = consumer.drain::<1024>(|_| {});
            if n == 0 {
                spin_hint();
            }
            consumed += n;
        }
    });

    while !ready.load(Ordering::Acquire) {
        spin_hint();
    }

    pin_to_cpu(producer_cpu);

    let start = TscClock::now();

    let mut produced = 0usize;
    while produced < ITERATIONS {
        let n = producer.fill_with::<1024>(|| 0);
        if n == 0 {
            spin_hint();
        }
        produced += n;
    }

    consumer_thread.join().unwrap();
    let elapsed = TscClock::scale().ticks_to_duration(TscClock::now() - start);

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("  u64 vectored (batch 1024): {ops_per_ms} ops/ms");
}

fn bench_rtt(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (q1_producer, q1_consumer) = ring::channel::<i32, RING_SIZE>();
    let (q2_producer, q2_consumer) = ring::channel::<i32, RING_SIZE>();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let responder = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for _ in 0..ITERATIONS {
            loop {
                if let Some(value) = q1_consumer.pop() {
                    q2_producer.push(value).unwrap();
                    break;
                }
                spin_hint();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        spin_hint();
    }

    pin_to_cpu(producer_cpu);

    let start = TscClock::now();

    for i in 0..ITERATIONS as i32 {
        q1_producer.push(i).unwrap();
        loop {
            if q2_consumer.pop().is_some() {
                break;
            }
            spin_hint();
        }
    }

    let elapsed = TscClock::scale().ticks_to_duration(TscClock::now() - start);
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / ITERATIONS as u128;
    println!("  {rtt_ns} ns RTT");
}

fn main() {
    carousel::init_tracing();

    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    if let Err(err) = TscClock::ensure_invariant() {
        eprintln!("warning: {err}; tick measurements may drift");
    }
    if let Some(hint) = CPU_HZ_HINT {
        println!("cpu hz hint: {hint}");
    }

    let cal = TscClock::scale();
    println!(
        "tsc: {:.3} ps/tick (converged: {})",
        cal.picos_per_tick(),
        cal.converged()
    );

    println!("carousel SPSC (size={RING_SIZE}, iters={ITERATIONS}):");
    bench_throughput::<u64>("u64", producer_cpu, consumer_cpu);
    bench_throughput::<ProbeSmall>("probe small", producer_cpu, consumer_cpu);
    bench_throughput::<ProbePadded>("probe padded", producer_cpu, consumer_cpu);
    bench_throughput::<ProbeBook>("probe book", producer_cpu, consumer_cpu);
    bench_throughput_batched(producer_cpu, consumer_cpu);
    bench_rtt(producer_cpu, consumer_cpu);
}
