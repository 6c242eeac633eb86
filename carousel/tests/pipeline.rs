//! End-to-end tests for the N-stage pipeline: bootstrap order, window
//! sequences, lifecycle accounting, and a three-thread conservation stress
//! run.

use std::sync::atomic::{AtomicUsize, Ordering};

use carousel::pipeline;
use carousel::spin_hint;

#[test]
fn three_stage_bootstrap() {
    let [s0, s1, s2] = pipeline::stages::<u64, 16, 3>();

    // Before the first stage moves, nobody else sees work.
    assert_eq!(s1.invoke_obj::<16>(|_| panic!("no work yet")), 0);
    assert_eq!(s2.invoke_obj::<16>(|_| panic!("no work yet")), 0);

    // The first stage sees the whole arena; it processes 12 of 16.
    let mut next = 0u64;
    assert_eq!(
        s0.invoke_obj::<12>(|slot| {
            *slot = next;
            next += 1;
        }),
        12
    );

    // The middle stage now sees those 12; the sink still sees nothing.
    assert_eq!(s2.invoke_obj::<16>(|_| panic!("upstream has not released")), 0);
    assert_eq!(s1.invoke_obj::<16>(|slot| *slot *= 3), 12);

    // The sink sees 12, and the source may produce 12 more.
    let mut seen = Vec::new();
    assert_eq!(s2.invoke_obj::<16>(|slot| seen.push(*slot)), 12);
    assert_eq!(seen, (0..12).map(|v| v * 3).collect::<Vec<_>>());

    assert_eq!(s0.invoke_obj::<12>(|_| {}), 12);
}

#[test]
fn two_stage_window_sequence() {
    let [s0, s1] = pipeline::stages::<u64, 16, 2>();

    // SAFETY: the payload is a plain integer; the raw spans are written
    // before the downstream stage reads them.
    unsafe {
        assert_eq!(s1.invoke_mem::<16>(|_| {}), 0);
        assert_eq!(
            s0.invoke_mem::<16>(|span| {
                for slot in span.iter_mut() {
                    slot.write(7);
                }
            }),
            16
        );
        assert_eq!(
            s1.invoke_mem::<12>(|span| {
                for slot in span.iter() {
                    // SAFETY: written by the upstream pass above.
                    assert_eq!(unsafe { slot.assume_init_read() }, 7);
                }
            }),
            12
        );
        assert_eq!(s1.invoke_mem::<16>(|_| {}), 4);
        assert_eq!(s1.invoke_mem::<16>(|_| {}), 0);
        assert_eq!(
            s0.invoke_mem::<7>(|span| {
                for slot in span.iter_mut() {
                    slot.write(9);
                }
            }),
            7
        );
        assert_eq!(s1.invoke_mem::<16>(|_| {}), 7);
    }
}

#[test]
fn full_arena_batches_wrap_in_two_spans() {
    let [s0, s1] = pipeline::stages::<u64, 8, 2>();

    // Offset the positions so the next full window straddles the arena end.
    assert_eq!(s0.invoke_obj::<5>(|slot| *slot = 1), 5);
    assert_eq!(s1.invoke_obj::<5>(|_| {}), 5);

    let mut spans = Vec::new();
    // SAFETY: every slot of every span is initialized.
    let filled = unsafe {
        s0.invoke_mem::<8>(|span| {
            spans.push(span.len());
            for slot in span.iter_mut() {
                slot.write(2);
            }
        })
    };
    assert_eq!(filled, 8);
    assert_eq!(spans, vec![3, 5]);
}

#[test]
fn minimal_arena_round_robin() {
    let [s0, s1] = pipeline::stages::<u64, 1, 2>();

    assert!(s0.invoke_single(|slot| *slot = 11));
    assert!(!s0.invoke_single(|_| panic!("arena is full")));
    assert!(s1.invoke_single(|slot| assert_eq!(*slot, 11)));
    assert!(s0.invoke_single(|slot| *slot = 12));
}

static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);
static DROPPED: AtomicUsize = AtomicUsize::new(0);

struct Tracked {
    _payload: u64,
}

impl Default for Tracked {
    fn default() -> Self {
        CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
        Self { _payload: 0 }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        DROPPED.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn first_stage_constructs_and_last_stage_destroys() {
    let [s0, s1] = pipeline::stages::<Tracked, 8, 2>();

    assert_eq!(s0.invoke_obj::<8>(|_| {}), 8);
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 8);
    assert_eq!(DROPPED.load(Ordering::SeqCst), 0);

    assert_eq!(s1.invoke_obj::<5>(|_| {}), 5);
    assert_eq!(DROPPED.load(Ordering::SeqCst), 5);

    // Teardown destroys the three still-live elements.
    drop(s0);
    drop(s1);
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 8);
    assert_eq!(DROPPED.load(Ordering::SeqCst), 8);
}

#[test]
fn three_thread_stress_conserves_elements() {
    const COUNT: u64 = 1_000_000;
    const BATCH: usize = 64;

    let [source, transform, sink] = pipeline::stages::<u64, 256, 3>();

    let source_thread = std::thread::spawn(move || {
        let mut next = 0u64;
        while next < COUNT {
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
        let mut processed = 0u64;
        while processed < COUNT {
            let n = transform.invoke_obj::<BATCH>(|slot| *slot = slot.wrapping_add(1));
            if n == 0 {
                spin_hint();
            }
            processed += n as u64;
        }
    });

    let sink_thread = std::thread::spawn(move || {
        let mut expected = 0u64;
        while expected < COUNT {
            let n = sink.invoke_obj::<BATCH>(|slot| {
                assert_eq!(*slot, expected + 1, "element lost, duplicated, or reordered");
                expected += 1;
            });
            if n == 0 {
                spin_hint();
            }
        }
    });

    source_thread.join().unwrap();
    transform_thread.join().unwrap();
    sink_thread.join().unwrap();
}
