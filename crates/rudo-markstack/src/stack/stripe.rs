//! Address-partitioned shared work lists.
//!
//! Each stripe holds two lists of full segments. *Published* segments were
//! shared on purpose and are the first place other workers look.
//! *Overflowed* segments spilled out of a full private buffer; keeping them
//! apart lowers contention on the published list and lets the originating
//! worker reclaim its own spillage.

use crossbeam::utils::CachePadded;

use super::list::LockFreeList;
use super::segment::Segment;
use crate::alloc::arena::Arena;

/// Upper bound on stripes per collector instance.
pub const MAX_STRIPES: usize = 16;

/// Identifies a stripe within a [`StripeSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StripeId(usize);

impl StripeId {
    /// Create a stripe id. Must be below the stripe set's count.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        debug_assert!(index < MAX_STRIPES, "stripe id out of range");
        Self(index)
    }

    /// Position of the stripe in its set.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A pair of shared segment lists.
#[derive(Debug, Default)]
pub struct Stripe {
    published: CachePadded<LockFreeList>,
    overflowed: CachePadded<LockFreeList>,
}

impl Stripe {
    /// Create an empty stripe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Best-effort snapshot; concurrent publishers may race with it.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.is_empty() && self.overflowed.is_empty()
    }

    /// Share a full segment, on the published list if `publish` is set and
    /// on the overflowed list otherwise.
    pub(crate) fn publish<'a>(&self, segment: Segment<'a>, publish: bool) {
        debug_assert!(!segment.is_empty(), "shared segments are never empty");
        if publish {
            self.published.push(segment);
        } else {
            self.overflowed.push(segment);
        }
    }

    /// Take a shared segment, preferring overflowed work.
    pub(crate) fn steal<'a>(&self, arena: &'a Arena) -> Option<Segment<'a>> {
        self.overflowed
            .pop(arena)
            .or_else(|| self.published.pop(arena))
    }

    fn clear(&mut self) {
        self.published.clear();
        self.overflowed.clear();
    }
}

/// The fixed array of stripes used during one marking cycle.
#[derive(Debug)]
pub struct StripeSet {
    stripes: [Stripe; MAX_STRIPES],
    count: usize,
    mask: usize,
    shift: u32,
}

impl StripeSet {
    /// Create a set with `count` active stripes routing on address bits
    /// above `shift`.
    ///
    /// # Panics
    ///
    /// Panics if `count` is not a power of two in `1..=MAX_STRIPES`.
    #[must_use]
    pub fn new(count: usize, shift: u32) -> Self {
        let mut set = Self {
            stripes: std::array::from_fn(|_| Stripe::new()),
            count: 1,
            mask: 0,
            shift,
        };
        set.set_stripe_count(count);
        set
    }

    /// Change the number of active stripes between cycles.
    ///
    /// # Panics
    ///
    /// Panics if `count` is not a power of two in `1..=MAX_STRIPES`.
    pub fn set_stripe_count(&mut self, count: usize) {
        assert!(
            count.is_power_of_two() && count <= MAX_STRIPES,
            "stripe count {count} must be a power of two no larger than {MAX_STRIPES}"
        );
        self.count = count;
        self.mask = count - 1;
    }

    /// Change the address shift used by [`stripe_for_addr`](Self::stripe_for_addr).
    pub const fn set_stripe_shift(&mut self, shift: u32) {
        self.shift = shift;
    }

    /// Number of active stripes.
    #[must_use]
    pub const fn stripe_count(&self) -> usize {
        self.count
    }

    /// Address shift used for routing.
    #[must_use]
    pub const fn shift(&self) -> u32 {
        self.shift
    }

    /// The stripe with the given id.
    #[must_use]
    pub fn stripe_at(&self, id: StripeId) -> &Stripe {
        debug_assert!(id.index() < self.count, "stripe id out of range");
        &self.stripes[id.index()]
    }

    /// Round-robin successor of `id`, used to walk the other stripes when
    /// stealing.
    #[must_use]
    pub const fn stripe_next(&self, id: StripeId) -> StripeId {
        StripeId((id.0 + 1) & self.mask)
    }

    /// Route an object address to a stripe.
    ///
    /// Masks a band of address bits above the configured shift, so nearby
    /// objects share a stripe while unrelated ones spread evenly.
    #[must_use]
    pub const fn stripe_for_addr(&self, addr: usize) -> StripeId {
        StripeId((addr >> self.shift) & self.mask)
    }

    /// Home stripe for `worker_id` out of `nworkers`.
    ///
    /// The first `⌊N/S⌋·S` workers cycle through the stripes. The remaining
    /// `k < S` spillover workers are spread as `⌊i·S/k⌋`, so each lands on a
    /// distinct stripe and no stripe ends up with more than one worker above
    /// any other. Ties round down.
    #[must_use]
    pub const fn stripe_for_worker(&self, nworkers: usize, worker_id: usize) -> StripeId {
        debug_assert!(worker_id < nworkers, "worker id out of range");
        let spillover_limit = (nworkers / self.count) * self.count;
        if worker_id < spillover_limit {
            return StripeId(worker_id & self.mask);
        }
        let spillover_workers = nworkers - spillover_limit;
        let spillover_id = worker_id - spillover_limit;
        StripeId(spillover_id * self.count / spillover_workers)
    }

    /// Heuristic: whether every active stripe looked empty when checked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes[..self.count].iter().all(Stripe::is_empty)
    }

    /// Iterate over active stripe ids.
    pub fn ids(&self) -> impl Iterator<Item = StripeId> {
        (0..self.count).map(StripeId)
    }

    /// Drop all shared work. Used when a cycle ends or is aborted.
    pub fn clear(&mut self) {
        for stripe in &mut self.stripes {
            stripe.clear();
        }
    }
}
