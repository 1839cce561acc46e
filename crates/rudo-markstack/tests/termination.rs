//! Termination barrier behaviour, alone and through the worker loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use rudo_markstack::{MarkStackConfig, MarkStacks, TerminationBarrier, WorkEntry};

#[test]
fn test_reset_then_concurrent_enter_has_one_winner() {
    let barrier = TerminationBarrier::new(1);
    for _ in 0..100 {
        barrier.reset(4);
        let start = Barrier::new(4);
        let winners = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    start.wait();
                    if barrier.enter_stage0() {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(winners.load(Ordering::Relaxed), 1);
        assert!(!barrier.try_exit_stage0(), "a completed stage reopened");
    }
}

#[test]
fn test_exit_before_all_entered_defers_termination() {
    let barrier = TerminationBarrier::new(4);
    assert!(!barrier.enter_stage0());
    assert!(!barrier.enter_stage0());
    // A worker found more work and backs out.
    barrier.exit_stage0();
    assert!(!barrier.enter_stage0());
    assert!(!barrier.enter_stage0());
    // Only the re-entry of the worker that left completes the stage.
    assert!(barrier.enter_stage0());
}

#[test]
fn test_stages_are_independent() {
    let barrier = TerminationBarrier::new(2);
    assert!(!barrier.enter_stage0());
    assert!(!barrier.enter_stage1());
    assert!(barrier.try_exit_stage1());
    assert!(barrier.enter_stage0());
    assert!(!barrier.enter_stage1());
    assert!(barrier.enter_stage1());
    assert!(!barrier.try_exit_stage1());
    assert!(!barrier.try_exit_stage0());
}

/// Idle workers must wait for the one still producing work.
#[test]
fn test_idle_workers_wait_for_busy_worker() {
    const WORKERS: usize = 4;
    let config = MarkStackConfig::new(WORKERS)
        .with_stripe_shift(12)
        .with_arena(1 << 26, 1 << 18);
    let stacks = MarkStacks::new(config).expect("stacks");
    let visited = AtomicUsize::new(0);

    thread::scope(|s| {
        for id in 0..WORKERS {
            let stacks = &stacks;
            let visited = &visited;
            s.spawn(move || {
                let mut worker = stacks.worker(id);
                if id == 0 {
                    // Let the others go idle first, then share a batch.
                    thread::sleep(Duration::from_millis(20));
                    for i in 0..2000 {
                        let entry = WorkEntry::object(i << 12, true, false, false, false);
                        worker.push_object(entry, true).expect("push");
                    }
                    worker.flush();
                }
                let count = worker
                    .run(|_, _| {
                        visited.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    })
                    .expect("run");
                assert!(count <= 2000);
            });
        }
    });

    assert_eq!(visited.load(Ordering::Relaxed), 2000);
    assert!(stacks.is_empty());
}

#[test]
fn test_many_workers_without_work_terminate() {
    let workers = 8;
    let config = MarkStackConfig::new(workers).with_arena(1 << 24, 1 << 16);
    let stacks = MarkStacks::new(config).expect("stacks");
    thread::scope(|s| {
        for id in 0..workers {
            let stacks = &stacks;
            s.spawn(move || assert_eq!(stacks.worker(id).run(|_, _| Ok(())).expect("run"), 0));
        }
    });
    assert!(stacks.stats().termination_rounds >= workers);
}
