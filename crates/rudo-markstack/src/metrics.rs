//! Mark stack counters and statistics.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::alloc::allocator::MarkStackAllocator;

/// Point-in-time statistics for one collector instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkStackMetrics {
    /// Segments handed to a published list.
    pub published: usize,
    /// Segments handed to an overflowed list.
    pub overflowed: usize,
    /// Segments taken from a shared list, by `pop` refills and `try_steal`.
    pub stolen: usize,
    /// Flushes that published at least one segment.
    pub flushes: usize,
    /// Flushes triggered by the flush timeout.
    pub proactive_flushes: usize,
    /// Termination attempts across all workers.
    pub termination_rounds: usize,
    /// Magazines carved from the arena.
    pub magazines_allocated: usize,
    /// Arena expansions since creation.
    pub arena_expansions: usize,
    /// Arena bytes in use.
    pub arena_used: usize,
    /// Arena bytes committed.
    pub arena_committed: usize,
}

/// Live counters updated by workers.
///
/// All counters are statistical and use relaxed ordering.
#[derive(Debug, Default)]
pub struct MarkStackStats {
    published: AtomicUsize,
    overflowed: AtomicUsize,
    stolen: AtomicUsize,
    flushes: AtomicUsize,
    proactive_flushes: AtomicUsize,
    termination_rounds: AtomicUsize,
}

impl MarkStackStats {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            published: AtomicUsize::new(0),
            overflowed: AtomicUsize::new(0),
            stolen: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            proactive_flushes: AtomicUsize::new(0),
            termination_rounds: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_steal(&self) {
        self.stolen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_proactive_flush(&self) {
        self.proactive_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_termination_round(&self) {
        self.termination_rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter. Arena figures are not affected.
    pub fn reset(&self) {
        self.published.store(0, Ordering::Relaxed);
        self.overflowed.store(0, Ordering::Relaxed);
        self.stolen.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.proactive_flushes.store(0, Ordering::Relaxed);
        self.termination_rounds.store(0, Ordering::Relaxed);
    }

    /// Read every counter, together with the allocator's arena figures.
    #[must_use]
    pub fn snapshot(&self, allocator: &MarkStackAllocator) -> MarkStackMetrics {
        let arena = allocator.arena();
        MarkStackMetrics {
            published: self.published.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            stolen: self.stolen.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            proactive_flushes: self.proactive_flushes.load(Ordering::Relaxed),
            termination_rounds: self.termination_rounds.load(Ordering::Relaxed),
            magazines_allocated: allocator.magazines_created(),
            arena_expansions: arena.expansions(),
            arena_used: arena.used(),
            arena_committed: arena.committed(),
        }
    }
}
