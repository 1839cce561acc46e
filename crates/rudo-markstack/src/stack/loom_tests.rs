//! Loom models for the versioned slot list.
//!
//! Run with `RUSTFLAGS="--cfg loom" cargo test -p rudo-markstack --lib --release loom_tests`.
//!
//! Each model carves its nodes from a fresh arena on the main thread before
//! spawning, keeps to two workers plus the main thread, and hands slot
//! indices, not tokens, back across joins.

use std::collections::HashSet;

use loom::sync::Arc;
use loom::thread;

use super::list::LockFreeList;
use super::segment::{Segment, SlotIndex};
use crate::alloc::allocator::MarkStackAllocator;

struct Shared {
    allocator: MarkStackAllocator,
    list: LockFreeList,
}

impl Shared {
    fn seeded(nodes: usize) -> (Arc<Self>, HashSet<SlotIndex>) {
        let shared = Self {
            allocator: MarkStackAllocator::new(1 << 20, 1 << 16).expect("reserve"),
            list: LockFreeList::new(),
        };
        let mut seeded = HashSet::new();
        for _ in 0..nodes {
            let segment = shared.allocator.alloc_segment().expect("segment");
            seeded.insert(segment.index());
            shared.list.push(segment);
        }
        (Arc::new(shared), seeded)
    }

    fn pop(&self) -> Option<Segment<'_>> {
        self.list.pop(self.allocator.arena())
    }

    fn drain(&self, seen: &mut Vec<SlotIndex>) {
        while let Some(segment) = self.pop() {
            seen.push(segment.index());
        }
    }
}

fn assert_exactly_once(seen: &[SlotIndex], seeded: &HashSet<SlotIndex>) {
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "a node was delivered twice");
    assert_eq!(&unique, seeded, "a node was lost");
}

/// One thread pops two nodes and pushes the first back, recreating the old
/// head bit pattern, while another thread pops once. The second popper may
/// hold a head snapshot from before the reuse; its CAS must not succeed.
#[test]
fn test_reused_head_is_not_delivered_twice() {
    loom::model(|| {
        let (shared, seeded) = Shared::seeded(2);

        let recycler = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let first = shared.pop();
                let second = shared.pop();
                if let Some(first) = first {
                    shared.list.push(first);
                }
                second.map(|segment| segment.index())
            })
        };
        let popper = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.pop().map(|segment| segment.index()))
        };

        let mut seen: Vec<SlotIndex> = recycler.join().unwrap().into_iter().collect();
        seen.extend(popper.join().unwrap());
        shared.drain(&mut seen);
        assert_exactly_once(&seen, &seeded);
    });
}

/// Two threads each pop a node and push it back. Nothing is lost or
/// duplicated, whichever order the pushes and pops interleave in.
#[test]
fn test_concurrent_pop_push_round_trips() {
    loom::model(|| {
        let (shared, seeded) = Shared::seeded(2);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    if let Some(segment) = shared.pop() {
                        shared.list.push(segment);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = Vec::new();
        shared.drain(&mut seen);
        assert_exactly_once(&seen, &seeded);
    });
}
