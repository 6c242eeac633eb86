//! Three-stage pipeline throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin pipeline_bench
//!
//! Environment variables:
//!     STAGE0_CPU=0  Pin the source stage (default: 0)
//!     STAGE1_CPU=2  Pin the transform stage (default: 2)
//!     STAGE2_CPU=4  Pin the sink stage (default: 4)

use std::env;

use carousel::clock::TscClock;
use carousel::pipeline;
use carousel::spin_hint;

const ARENA_SIZE: usize = 1 << 14;
const BATCH: usize = 1 << 10;
const ITERATIONS: usize = 1 << 24;

fn stage_cpu(var: &str, default: usize) -> Option<usize> {
    env::var(var).ok().and_then(|s| s.parse().ok()).or(Some(default))
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn main() {
    carousel::init_tracing();

    if let Err(err) = TscClock::ensure_invariant() {
        eprintln!("warning: {err}; tick measurements may drift");
    }
    let cal = TscClock::scale();

    let [source, transform, sink] = pipeline::stages::<u64, ARENA_SIZE, 3>();

    let cpus = [
        stage_cpu("STAGE0_CPU", 0),
        stage_cpu("STAGE1_CPU", 2),
        stage_cpu("STAGE2_CPU", 4),
    ];

    let start = TscClock::now();

    let source_thread = std::thread::spawn(move || {
        pin_to_cpu(cpus[0]);
        let mut next = 0u64;
        while (next as usize) < ITERATIONS {
            if source.invoke_obj::<BATCH>(|slot| {
                *slot = next;
                next += 1;
            }) == 0
            {
                spin_hint();
            }
        }
    });

    let transform_thread = std::thread::spawn(move || {
        pin_to_cpu(cpus[1]);
        let mut processed = 0usize;
        while processed < ITERATIONS {
            let n = transform.invoke_obj::<BATCH>(|slot| *slot = slot.wrapping_mul(31));
            if n == 0 {
                spin_hint();
            }
            processed += n;
        }
    });

    let sink_thread = std::thread::spawn(move || {
        pin_to_cpu(cpus[2]);
        let mut checksum = 0u64;
        let mut processed = 0usize;
        while processed < ITERATIONS {
            let n = sink.invoke_obj::<BATCH>(|slot| checksum = checksum.wrapping_add(*slot));
            if n == 0 {
                spin_hint();
            }
            processed += n;
        }
        checksum
    });

    source_thread.join().unwrap();
    transform_thread.join().unwrap();
    let checksum = sink_thread.join().unwrap();

    let elapsed = cal.ticks_to_duration(TscClock::now() - start);
    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();

    println!("carousel pipeline (stages=3, arena={ARENA_SIZE}, iters={ITERATIONS}):");
    println!("  {ops_per_ms} ops/ms (checksum {checksum:#x})");
}
