//! Shared state of one collector instance.

use crate::alloc::allocator::MarkStackAllocator;
use crate::config::MarkStackConfig;
use crate::error::MarkStackError;
use crate::metrics::{MarkStackMetrics, MarkStackStats};
use crate::stack::entry::WorkEntry;
use crate::stack::local::ThreadLocalStacks;
use crate::stack::stripe::{StripeId, StripeSet};
use crate::sync::atomic::{AtomicBool, Ordering};
use crate::terminate::TerminationBarrier;
use crate::worker::MarkWorker;

/// Everything marking workers share during a cycle.
///
/// Created once per collector instance and passed by reference into worker
/// threads. Workers borrow it, so [`end_cycle`](Self::end_cycle) and
/// [`reconfigure`](Self::reconfigure) can only run once every worker has
/// finished.
///
/// # Example
///
/// ```
/// use rudo_markstack::{MarkStackConfig, MarkStacks, WorkEntry};
///
/// let config = MarkStackConfig::new(2).with_arena(1 << 24, 1 << 20);
/// let stacks = MarkStacks::new(config).unwrap();
///
/// let root = WorkEntry::object(0x1000, true, false, true, false);
/// stacks.publish(stacks.stripe_for_addr(0x1000), root).unwrap();
///
/// let visited = std::thread::scope(|s| {
///     let handles: Vec<_> = (0..2)
///         .map(|id| {
///             let stacks = &stacks;
///             s.spawn(move || stacks.worker(id).run(|_, _| Ok(())).unwrap())
///         })
///         .collect();
///     handles.into_iter().map(|h| h.join().unwrap()).sum::<usize>()
/// });
/// assert_eq!(visited, 1);
/// ```
#[derive(Debug)]
pub struct MarkStacks {
    config: MarkStackConfig,
    allocator: MarkStackAllocator,
    stripes: StripeSet,
    barrier: TerminationBarrier,
    stats: MarkStackStats,
    aborted: AtomicBool,
}

impl MarkStacks {
    /// Validate `config` and reserve the arena.
    ///
    /// # Errors
    ///
    /// [`MarkStackError::Config`] for an invalid configuration and
    /// [`MarkStackError::Reserve`] if the arena cannot be reserved.
    pub fn new(config: MarkStackConfig) -> Result<Self, MarkStackError> {
        config.validate()?;
        Ok(Self {
            allocator: MarkStackAllocator::new(config.arena_limit, config.expand_chunk)?,
            stripes: StripeSet::new(config.stripes, config.stripe_shift),
            barrier: TerminationBarrier::new(config.workers),
            stats: MarkStackStats::new(),
            aborted: AtomicBool::new(false),
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &MarkStackConfig {
        &self.config
    }

    /// Create the driver for worker `id`.
    ///
    /// Every id in `0..config.workers` must be used exactly once per cycle,
    /// otherwise termination never completes.
    #[must_use]
    pub fn worker(&self, id: usize) -> MarkWorker<'_> {
        debug_assert!(id < self.config.workers, "worker id out of range");
        let home = self.stripes.stripe_for_worker(self.config.workers, id);
        MarkWorker::new(id, home, self)
    }

    /// Create bare private stacks, for callers that drive the termination
    /// protocol themselves.
    #[must_use]
    pub fn local_stacks(&self) -> ThreadLocalStacks<'_> {
        ThreadLocalStacks::new(&self.allocator, &self.stripes, &self.stats)
    }

    /// Publish a single entry from a thread that is not a marking worker.
    ///
    /// # Errors
    ///
    /// Propagates arena exhaustion.
    pub fn publish(&self, stripe: StripeId, entry: WorkEntry) -> Result<(), MarkStackError> {
        let mut segment = self.allocator.alloc_segment()?;
        let pushed = segment.push(entry);
        debug_assert!(pushed, "fresh segment rejected an entry");
        self.stats.record_publish();
        self.stripes.stripe_at(stripe).publish(segment, true);
        Ok(())
    }

    /// Stripe owning `addr`.
    #[must_use]
    pub const fn stripe_for_addr(&self, addr: usize) -> StripeId {
        self.stripes.stripe_for_addr(addr)
    }

    /// The stripe set.
    #[must_use]
    pub const fn stripes(&self) -> &StripeSet {
        &self.stripes
    }

    /// The termination barrier.
    #[must_use]
    pub const fn barrier(&self) -> &TerminationBarrier {
        &self.barrier
    }

    /// The segment allocator.
    #[must_use]
    pub const fn allocator(&self) -> &MarkStackAllocator {
        &self.allocator
    }

    /// Stop the current cycle.
    ///
    /// Running workers notice within [`PROACTIVE_FLUSH_CHECK_INTERVAL`]
    /// entries, or on their next termination round, and return
    /// [`MarkStackError::Aborted`]. [`MarkWorker::run`] calls this itself
    /// when it fails.
    ///
    /// [`PROACTIVE_FLUSH_CHECK_INTERVAL`]: crate::PROACTIVE_FLUSH_CHECK_INTERVAL
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Whether the current cycle was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub(crate) const fn counters(&self) -> &MarkStackStats {
        &self.stats
    }

    /// Heuristic: whether every shared list looked empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Drop leftover shared work, give unused arena memory back, rearm
    /// the barrier and clear the abort flag for the next cycle.
    ///
    /// Work left in the lists is discarded; after an aborted cycle that is
    /// the point.
    ///
    /// # Errors
    ///
    /// Propagates decommit failures. The stacks are reset regardless.
    pub fn end_cycle(&mut self) -> Result<(), MarkStackError> {
        self.stripes.clear();
        self.barrier.reset(self.config.workers);
        self.aborted.store(false, Ordering::Relaxed);
        let result = self.allocator.reset();
        #[cfg(feature = "tracing")]
        crate::tracing::log_end_cycle(
            self.allocator.arena().used(),
            self.allocator.arena().committed(),
        );
        result
    }

    /// End the cycle and switch to `config` for the next one.
    ///
    /// The arena is only replaced when its limit or chunk size changes.
    ///
    /// # Errors
    ///
    /// [`MarkStackError::Config`] leaves the current configuration in place.
    pub fn reconfigure(&mut self, config: MarkStackConfig) -> Result<(), MarkStackError> {
        config.validate()?;
        if config.arena_limit != self.config.arena_limit
            || config.expand_chunk != self.config.expand_chunk
        {
            self.allocator = MarkStackAllocator::new(config.arena_limit, config.expand_chunk)?;
        }
        self.config = config;
        self.stripes.set_stripe_count(config.stripes);
        self.stripes.set_stripe_shift(config.stripe_shift);
        self.end_cycle()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> MarkStackMetrics {
        self.stats.snapshot(&self.allocator)
    }

    /// Zero the counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn config() -> MarkStackConfig {
        MarkStackConfig::new(2)
            .with_stripes(2)
            .with_stripe_shift(12)
            .with_arena(1 << 24, 1 << 16)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = MarkStacks::new(config().with_stripes(3)).expect_err("bad stripes");
        assert!(matches!(
            err,
            MarkStackError::Config(ConfigError::InvalidStripeCount(3))
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_publish_then_local_pop() {
        let stacks = MarkStacks::new(config()).expect("stacks");
        let entry = WorkEntry::object(0x3000, true, false, true, false);
        let stripe = stacks.stripe_for_addr(0x3000);
        assert_eq!(stripe, StripeId::new(1));

        stacks.publish(stripe, entry).expect("publish");
        assert!(!stacks.is_empty());

        let mut local = stacks.local_stacks();
        assert_eq!(local.pop(stripe), Some(entry));
        assert_eq!(local.pop(stripe), None);
        assert!(stacks.is_empty());
    }

    #[test]
    fn test_end_cycle_discards_and_resets() {
        let mut stacks = MarkStacks::new(config()).expect("stacks");
        for i in 0..100 {
            let entry = WorkEntry::object(i << 12, true, false, false, false);
            stacks.publish(stacks.stripe_for_addr(i << 12), entry).expect("publish");
        }
        assert!(stacks.stats().arena_used > 0);

        stacks.end_cycle().expect("end cycle");
        assert!(stacks.is_empty());
        assert_eq!(stacks.stats().arena_used, 0);
        assert!(!stacks.barrier().enter_stage0());
        assert!(stacks.barrier().enter_stage0());
    }

    #[test]
    fn test_abort_stops_workers_until_end_cycle() {
        let mut stacks = MarkStacks::new(config()).expect("stacks");
        stacks
            .publish(StripeId::new(0), WorkEntry::object(0, true, false, false, false))
            .expect("publish");
        stacks.abort();
        assert!(stacks.is_aborted());

        let result = stacks.worker(0).run(|_, _| Ok(()));
        assert!(matches!(result, Err(MarkStackError::Aborted)));

        stacks.end_cycle().expect("end cycle");
        assert!(!stacks.is_aborted());
    }

    #[test]
    fn test_reconfigure_changes_shape() {
        let mut stacks = MarkStacks::new(config()).expect("stacks");
        stacks
            .reconfigure(config().with_workers(8).with_stripes(8))
            .expect("reconfigure");
        assert_eq!(stacks.stripes().stripe_count(), 8);
        assert_eq!(stacks.config().workers, 8);

        let err = stacks.reconfigure(config().with_workers(0));
        assert!(err.is_err());
        assert_eq!(stacks.config().workers, 8);
    }
}
