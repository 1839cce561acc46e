//! Magazine allocator.
//!
//! Workers never allocate segments one at a time from the arena. They take a
//! whole magazine of empty segments, split it locally, and return full
//! magazines in bulk, so cross-thread traffic is one CAS per
//! [`MAGAZINE_CAPACITY`] segments.

use crossbeam::utils::CachePadded;

use super::arena::Arena;
use crate::error::MarkStackError;
use crate::stack::list::LockFreeList;
use crate::stack::segment::{Magazine, Segment, Slot, SlotIndex, MAGAZINE_CAPACITY, SLOT_SIZE};
use crate::sync::atomic::{AtomicUsize, Ordering};

/// Slots carved per arena request: one magazine plus the segments it holds.
pub const MAGAZINE_CHUNK_SLOTS: usize = MAGAZINE_CAPACITY + 1;
/// Bytes carved per arena request.
pub const MAGAZINE_CHUNK_BYTES: usize = MAGAZINE_CHUNK_SLOTS * SLOT_SIZE;

/// Hands out magazines of empty segments, backed by an [`Arena`].
#[derive(Debug)]
pub struct MarkStackAllocator {
    arena: Arena,
    free_magazines: CachePadded<LockFreeList>,
    magazines_created: AtomicUsize,
}

impl MarkStackAllocator {
    /// Create an allocator over a fresh arena.
    ///
    /// # Errors
    ///
    /// Returns [`MarkStackError::Config`] if `limit` is beyond what a slot
    /// index can address, and [`MarkStackError::Reserve`] if the arena
    /// cannot be reserved.
    pub fn new(limit: usize, expand_chunk: usize) -> Result<Self, MarkStackError> {
        Ok(Self {
            arena: Arena::new(limit, expand_chunk)?,
            free_magazines: CachePadded::new(LockFreeList::new()),
            magazines_created: AtomicUsize::new(0),
        })
    }

    /// The backing arena.
    #[must_use]
    pub const fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Take a magazine from the free list, carving a new one on a miss.
    ///
    /// # Errors
    ///
    /// Propagates arena exhaustion, which is fatal for the cycle.
    pub fn alloc_magazine(&self) -> Result<Magazine<'_>, MarkStackError> {
        if let Some(magazine) = self.free_magazines.pop(&self.arena) {
            return Ok(magazine);
        }
        self.create_magazine()
    }

    /// Return a magazine for reuse by any worker.
    pub fn free_magazine<'a>(&'a self, magazine: Magazine<'a>) {
        self.free_magazines.push(magazine);
    }

    /// Take a single empty segment.
    ///
    /// Used by producer threads that publish without keeping local stacks.
    ///
    /// # Errors
    ///
    /// Propagates arena exhaustion.
    pub fn alloc_segment(&self) -> Result<Segment<'_>, MarkStackError> {
        let mut magazine = self.alloc_magazine()?;
        match magazine.pop(&self.arena) {
            Some(segment) => {
                self.free_magazine(magazine);
                Ok(segment)
            }
            None => Ok(magazine.into_segment()),
        }
    }

    /// Number of magazines carved from the arena since creation.
    #[must_use]
    pub fn magazines_created(&self) -> usize {
        self.magazines_created.load(Ordering::Relaxed)
    }

    /// Forget every magazine and give unused memory back to the OS.
    ///
    /// Called at cycle end; `&mut self` guarantees that no segment or
    /// magazine token is still alive.
    ///
    /// # Errors
    ///
    /// Propagates decommit failures from the arena.
    pub fn reset(&mut self) -> Result<(), MarkStackError> {
        self.free_magazines.clear();
        self.arena.shrink()
    }

    #[cold]
    fn create_magazine(&self) -> Result<Magazine<'_>, MarkStackError> {
        let offset = self.arena.alloc(MAGAZINE_CHUNK_BYTES)?;
        let first = SlotIndex::from_offset(offset);
        let segments = std::iter::successors(Some(first.next()), |index| Some(index.next()))
            .take(MAGAZINE_CAPACITY);

        for index in segments.clone() {
            // SAFETY: the chunk was just carved from committed arena memory
            // and is not visible to any other thread.
            unsafe { Slot::init_segment(self.arena.slot_ptr(index.offset())) };
        }
        // SAFETY: as above; every index now names an initialised segment.
        unsafe { Slot::init_magazine(self.arena.slot_ptr(offset), segments) };

        self.magazines_created.fetch_add(1, Ordering::Relaxed);
        // SAFETY: the slot was initialised as a magazine and only we know it.
        Ok(unsafe { Magazine::from_slot(first, self.arena.slot(first)) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_fresh_magazine_is_full_of_distinct_segments() {
        let allocator = MarkStackAllocator::new(1 << 22, 1 << 16).expect("reserve");
        let arena = allocator.arena();
        let mut magazine = allocator.alloc_magazine().expect("magazine");
        assert!(magazine.is_full());
        assert_eq!(allocator.magazines_created(), 1);

        let mut seen = HashSet::new();
        seen.insert(magazine.index());
        while let Some(segment) = magazine.pop(arena) {
            assert!(segment.is_empty());
            assert!(seen.insert(segment.index()), "segment handed out twice");
        }
        assert_eq!(seen.len(), MAGAZINE_CHUNK_SLOTS);
        assert_eq!(arena.used(), MAGAZINE_CHUNK_BYTES);
    }

    #[test]
    fn test_freed_magazine_is_reused() {
        let allocator = MarkStackAllocator::new(1 << 22, 1 << 16).expect("reserve");
        let magazine = allocator.alloc_magazine().expect("magazine");
        let index = magazine.index();
        allocator.free_magazine(magazine);

        let again = allocator.alloc_magazine().expect("magazine");
        assert_eq!(again.index(), index);
        assert_eq!(allocator.magazines_created(), 1);
    }

    #[test]
    fn test_alloc_segment_drains_then_converts_magazine() {
        let allocator = MarkStackAllocator::new(1 << 22, 1 << 16).expect("reserve");
        let mut indices = HashSet::new();
        for _ in 0..MAGAZINE_CHUNK_SLOTS {
            let segment = allocator.alloc_segment().expect("segment");
            assert!(indices.insert(segment.index()));
        }
        // One chunk covers the magazine slot plus every segment it carried.
        assert_eq!(allocator.magazines_created(), 1);
        allocator.alloc_segment().expect("segment");
        assert_eq!(allocator.magazines_created(), 2);
    }

    #[test]
    fn test_exhaustion_past_limit() {
        let limit = MAGAZINE_CHUNK_BYTES * 2;
        let allocator = MarkStackAllocator::new(limit, 1 << 12).expect("reserve");
        let mut held = Vec::new();
        let err = loop {
            match allocator.alloc_magazine() {
                Ok(magazine) => held.push(magazine),
                Err(err) => break err,
            }
            assert!(held.len() <= limit / MAGAZINE_CHUNK_BYTES + 1, "limit not enforced");
        };
        assert!(matches!(err, MarkStackError::ArenaExhausted { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejects_limit_beyond_slot_range() {
        let Some(limit) = crate::MarkStackConfig::max_arena_limit().checked_add(1) else {
            return;
        };
        let err = MarkStackAllocator::new(limit, 1 << 16).expect_err("unaddressable limit");
        assert!(matches!(
            err,
            MarkStackError::Config(crate::ConfigError::ArenaTooLarge { .. })
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_reset_shrinks_arena() {
        let mut allocator = MarkStackAllocator::new(1 << 24, 1 << 16).expect("reserve");
        for _ in 0..8 {
            let _ = allocator.alloc_magazine().expect("magazine");
        }
        let before = allocator.arena().committed();
        allocator.reset().expect("reset");
        assert_eq!(allocator.arena().used(), 0);
        assert!(allocator.arena().committed() <= before);

        let magazine = allocator.alloc_magazine().expect("magazine after reset");
        assert_eq!(magazine.index().offset(), 0);
    }
}
