//! ABA-safe lock-free list of arena slots.
//!
//! The list is a Treiber stack whose head packs a 32-bit [`SlotIndex`] with a
//! 32-bit version into one `u64`:
//!
//! ```text
//!  63                32 31                 0
//! +--------------------+--------------------+
//! |      version       |     slot index     |
//! +--------------------+--------------------+
//! ```
//!
//! Every successful head update bumps the version. Without it, a slot that is
//! popped, reused and pushed again between another thread's head load and its
//! CAS would leave the head bit-identical and let that stale CAS succeed with
//! a dangling `next`. With the version the stale CAS fails and retries.
//!
//! The list makes no ordering promise across threads: treat it as an
//! unordered multiset with exactly-once delivery.

use std::fmt;

use crossbeam::utils::Backoff;

use super::segment::{ListNode, SlotIndex};
use crate::alloc::arena::Arena;
use crate::sync::atomic::{AtomicU64, Ordering};

const INDEX_MASK: u64 = u32::MAX as u64;
const VERSION_SHIFT: u32 = 32;

#[inline]
const fn pack(version: u32, index: u32) -> u64 {
    ((version as u64) << VERSION_SHIFT) | index as u64
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn unpack(head: u64) -> (u32, u32) {
    ((head >> VERSION_SHIFT) as u32, (head & INDEX_MASK) as u32)
}

/// Lock-free list head shared between workers.
pub struct LockFreeList {
    head: AtomicU64,
}

impl LockFreeList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: AtomicU64::new(pack(0, SlotIndex::NIL)),
        }
    }

    /// Best-effort emptiness snapshot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let (_, index) = unpack(self.head.load(Ordering::Relaxed));
        index == SlotIndex::NIL
    }

    /// Link `node` in as the new head. Always succeeds.
    pub(crate) fn push<'a, N: ListNode<'a>>(&self, node: N) {
        let slot = node.slot();
        let index = node.into_index().raw();
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let (version, next) = unpack(head);
            slot.store_next(next);
            // Release publishes both the link and the slot body to the popper.
            match self.head.compare_exchange_weak(
                head,
                pack(version.wrapping_add(1), index),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }
    }

    /// Unlink and return the head node, if any.
    pub(crate) fn pop<'a, N: ListNode<'a>>(&self, arena: &'a Arena) -> Option<N> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (version, index) = unpack(head);
            let index = SlotIndex::from_raw(index)?;
            // The slot may already have been popped and reused by another
            // thread; `next` is atomic and the versioned CAS below rejects
            // whatever stale value we read.
            let next = arena.slot(index).load_next();
            match self.head.compare_exchange_weak(
                head,
                pack(version.wrapping_add(1), next),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                // SAFETY: the successful CAS removed `index` from the list, so
                // this thread is its only owner, and only `N` nodes are ever
                // pushed onto a given list.
                Ok(_) => return Some(unsafe { N::from_index(arena, index) }),
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }
    }

    /// Drop every node without visiting it.
    ///
    /// Taking `&mut self` guarantees no concurrent pusher or popper.
    pub(crate) fn clear(&mut self) {
        let (version, _) = unpack(self.head.load(Ordering::Relaxed));
        self.head
            .store(pack(version.wrapping_add(1), SlotIndex::NIL), Ordering::Relaxed);
    }
}

impl Default for LockFreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockFreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (version, index) = unpack(self.head.load(Ordering::Relaxed));
        f.debug_struct("LockFreeList")
            .field("version", &version)
            .field("head", &SlotIndex::from_raw(index))
            .finish()
    }
}
