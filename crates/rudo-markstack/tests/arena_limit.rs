//! Arena exhaustion must surface as a fatal error, never as silent success.

use std::thread;
use std::time::Duration;

use rudo_markstack::{
    MarkStackConfig, MarkStackError, MarkStacks, StripeId, WorkEntry, SEGMENT_CAPACITY,
};

fn small_config() -> MarkStackConfig {
    MarkStackConfig::new(1).with_arena(MarkStackConfig::min_arena_limit() * 2, 4096)
}

fn entry(i: usize) -> WorkEntry {
    WorkEntry::object(i << 4, true, false, false, false)
}

#[test]
fn test_push_past_limit_is_fatal() {
    let stacks = MarkStacks::new(small_config()).expect("stacks");
    let mut local = stacks.local_stacks();
    let stripe = StripeId::new(0);

    let mut pushed = 0;
    let err = loop {
        match local.push(stripe, entry(pushed), false) {
            Ok(()) => pushed += 1,
            Err(err) => break err,
        }
        assert!(pushed < 10_000_000, "arena limit never enforced");
    };

    assert!(matches!(err, MarkStackError::ArenaExhausted { .. }), "{err}");
    assert!(err.is_fatal());
    assert!(pushed >= SEGMENT_CAPACITY);

    // Retrying does not quietly succeed either.
    let again = local.push(stripe, entry(pushed), false);
    assert!(matches!(again, Err(MarkStackError::ArenaExhausted { .. })));

    let metrics = stacks.stats();
    assert!(metrics.arena_used <= metrics.arena_committed);
    assert!(metrics.arena_committed <= stacks.allocator().arena().limit());
}

#[test]
fn test_run_aborts_on_exhaustion() {
    let stacks = MarkStacks::new(small_config()).expect("stacks");
    let mut worker = stacks.worker(0);
    worker.push(StripeId::new(0), entry(0), true).expect("seed");

    // Every visit discovers two more entries, so work grows without bound.
    let result = worker.run(|entry, worker| {
        let next = entry.object_address() + 16;
        worker.push(StripeId::new(0), WorkEntry::object(next, true, false, false, false), false)?;
        worker.push(StripeId::new(0), WorkEntry::object(next, true, false, false, false), false)
    });

    match result {
        Err(err) => assert!(matches!(err, MarkStackError::ArenaExhausted { .. })),
        Ok(visited) => panic!("run finished after {visited} entries despite unbounded work"),
    }
}

#[test]
fn test_exhaustion_in_one_worker_stops_the_others() {
    let mut stacks = MarkStacks::new(
        MarkStackConfig::new(2).with_arena(MarkStackConfig::min_arena_limit() * 2, 4096),
    )
    .expect("stacks");

    let (first, second) = thread::scope(|s| {
        let stacks = &stacks;
        let grower = s.spawn(move || -> Result<usize, MarkStackError> {
            // Kept private so the root cannot be stolen before growth starts.
            let mut worker = stacks.worker(0);
            worker.push_object(entry(0), false)?;
            worker.run(|entry, worker| {
                worker.push_object(entry, false)?;
                worker.push_object(entry, false)
            })
        });
        // Slow enough that stealing never keeps up with the grower.
        let scanner = s.spawn(move || {
            stacks.worker(1).run(|_, _| {
                thread::sleep(Duration::from_micros(20));
                Ok(())
            })
        });
        (
            grower.join().expect("grower panicked"),
            scanner.join().expect("scanner panicked"),
        )
    });

    assert!(matches!(first, Err(MarkStackError::ArenaExhausted { .. })), "{first:?}");
    assert!(matches!(second, Err(MarkStackError::Aborted)), "{second:?}");
    assert!(stacks.is_aborted());

    stacks.end_cycle().expect("end cycle");
    assert!(!stacks.is_aborted());
    let visited = thread::scope(|s| {
        let stacks = &stacks;
        let handles: Vec<_> = (0..2)
            .map(|id| s.spawn(move || stacks.worker(id).run(|_, _| Ok(()))))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked").expect("run"))
            .sum::<usize>()
    });
    assert_eq!(visited, 0);
}

#[test]
fn test_end_cycle_recovers_after_abort() {
    let mut stacks = MarkStacks::new(small_config()).expect("stacks");
    {
        let mut local = stacks.local_stacks();
        let mut i = 0;
        while local.push(StripeId::new(0), entry(i), true).is_ok() {
            i += 1;
        }
    }
    assert!(!stacks.is_empty());

    stacks.end_cycle().expect("end cycle");
    assert!(stacks.is_empty());
    assert_eq!(stacks.stats().arena_used, 0);

    let mut local = stacks.local_stacks();
    local.push(StripeId::new(0), entry(1), true).expect("push after reset");
    assert_eq!(local.pop(StripeId::new(0)), Some(entry(1)));
}

#[test]
fn test_config_rejects_arena_below_one_chunk() {
    let config = MarkStackConfig::new(1).with_arena(1024, 1024);
    let err = MarkStacks::new(config).expect_err("too small");
    assert!(matches!(err, MarkStackError::Config(_)));
    assert!(!err.is_fatal());
}
