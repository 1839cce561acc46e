//! Per-worker private stacks.
//!
//! A worker keeps at most one private segment per stripe plus one magazine of
//! spare segments. Entries go into the private segment of their stripe; only
//! full segments ever reach the shared stripe lists, so a worker touches
//! shared state once per [`SEGMENT_CAPACITY`](super::segment::SEGMENT_CAPACITY)
//! pushes.

use std::fmt;

use super::entry::WorkEntry;
use super::segment::{Magazine, Segment};
use super::stripe::{StripeId, StripeSet, MAX_STRIPES};
use crate::alloc::allocator::MarkStackAllocator;
use crate::error::MarkStackError;
use crate::metrics::MarkStackStats;

/// Private segment cache of one worker.
///
/// Dropping the stacks flushes any remaining entries to the shared lists and
/// returns the held magazine, so no work is lost if a worker exits early.
pub struct ThreadLocalStacks<'a> {
    allocator: &'a MarkStackAllocator,
    stripes: &'a StripeSet,
    stats: &'a MarkStackStats,
    cached: [Option<Segment<'a>>; MAX_STRIPES],
    magazine: Option<Magazine<'a>>,
}

impl<'a> ThreadLocalStacks<'a> {
    /// Create empty stacks. Segments are obtained lazily.
    #[must_use]
    pub fn new(
        allocator: &'a MarkStackAllocator,
        stripes: &'a StripeSet,
        stats: &'a MarkStackStats,
    ) -> Self {
        Self {
            allocator,
            stripes,
            stats,
            cached: std::array::from_fn(|_| None),
            magazine: None,
        }
    }

    /// Push `entry` onto the private segment for `stripe`.
    ///
    /// When that segment is full it is handed to the stripe, on the published
    /// list if `publish` is set and on the overflowed list otherwise, and a
    /// fresh segment takes its place.
    ///
    /// # Errors
    ///
    /// [`MarkStackError::ArenaExhausted`] if no fresh segment can be
    /// allocated. The entry is not stored in that case.
    #[inline]
    pub fn push(
        &mut self,
        stripe: StripeId,
        entry: WorkEntry,
        publish: bool,
    ) -> Result<(), MarkStackError> {
        if let Some(segment) = &mut self.cached[stripe.index()] {
            if segment.push(entry) {
                return Ok(());
            }
        }
        self.push_slow(stripe, entry, publish)
    }

    #[cold]
    fn push_slow(
        &mut self,
        stripe: StripeId,
        entry: WorkEntry,
        publish: bool,
    ) -> Result<(), MarkStackError> {
        let mut fresh = self.allocate_segment()?;
        let pushed = fresh.push(entry);
        debug_assert!(pushed, "fresh segment rejected an entry");

        if let Some(full) = self.cached[stripe.index()].replace(fresh) {
            self.share(stripe, full, publish);
        }
        Ok(())
    }

    /// Pop an entry for `stripe`, refilling from the stripe's shared lists
    /// when the private segment runs dry.
    #[inline]
    pub fn pop(&mut self, stripe: StripeId) -> Option<WorkEntry> {
        if let Some(entry) = self.cached[stripe.index()].as_mut().and_then(Segment::pop) {
            return Some(entry);
        }
        self.pop_slow(stripe)
    }

    #[cold]
    fn pop_slow(&mut self, stripe: StripeId) -> Option<WorkEntry> {
        let mut stolen = self
            .stripes
            .stripe_at(stripe)
            .steal(self.allocator.arena())?;
        let entry = stolen.pop();
        debug_assert!(entry.is_some(), "shared segments are never empty");
        self.stats.record_steal();

        if let Some(empty) = self.cached[stripe.index()].replace(stolen) {
            self.free_segment(empty);
        }
        entry
    }

    /// Take one entry from the shared lists of `stripe`, bypassing the
    /// private segment.
    ///
    /// The stolen segment becomes the private segment if there is none or it
    /// is empty. Otherwise whatever remains of it is published again.
    pub fn try_steal(&mut self, stripe: StripeId) -> Option<WorkEntry> {
        let mut stolen = self
            .stripes
            .stripe_at(stripe)
            .steal(self.allocator.arena())?;
        let entry = stolen.pop();
        debug_assert!(entry.is_some(), "shared segments are never empty");
        self.stats.record_steal();

        let slot = &mut self.cached[stripe.index()];
        if slot.as_ref().is_none_or(Segment::is_empty) {
            if let Some(empty) = slot.replace(stolen) {
                self.free_segment(empty);
            }
        } else if stolen.is_empty() {
            self.free_segment(stolen);
        } else {
            self.stripes.stripe_at(stripe).publish(stolen, true);
        }
        entry
    }

    /// Publish every non-empty private segment and recycle the empty ones.
    ///
    /// Returns whether anything was published.
    pub fn flush(&mut self) -> bool {
        let mut published = 0;
        for index in 0..MAX_STRIPES {
            let Some(segment) = self.cached[index].take() else {
                continue;
            };
            if segment.is_empty() {
                self.free_segment(segment);
            } else {
                self.share(StripeId::new(index), segment, true);
                published += 1;
            }
        }

        if published > 0 {
            self.stats.record_flush();
            #[cfg(feature = "tracing")]
            crate::tracing::log_flush(published);
        }
        published > 0
    }

    /// Return the held magazine to the allocator.
    pub fn free(&mut self) {
        if let Some(magazine) = self.magazine.take() {
            self.allocator.free_magazine(magazine);
        }
    }

    /// Whether no private segment holds an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cached
            .iter()
            .all(|segment| segment.as_ref().is_none_or(Segment::is_empty))
    }

    fn share(&self, stripe: StripeId, segment: Segment<'a>, publish: bool) {
        if publish {
            self.stats.record_publish();
        } else {
            self.stats.record_overflow();
        }
        self.stripes.stripe_at(stripe).publish(segment, publish);
    }

    /// Take a spare segment from the magazine.
    ///
    /// An exhausted magazine is itself turned into the segment, so a magazine
    /// chunk is fully used before the allocator is asked again.
    fn allocate_segment(&mut self) -> Result<Segment<'a>, MarkStackError> {
        let mut magazine = match self.magazine.take() {
            Some(magazine) => magazine,
            None => self.allocator.alloc_magazine()?,
        };
        match magazine.pop(self.allocator.arena()) {
            Some(segment) => {
                self.magazine = Some(magazine);
                Ok(segment)
            }
            None => Ok(magazine.into_segment()),
        }
    }

    /// Put an empty segment back into the magazine.
    ///
    /// With no magazine held the segment becomes one. When the magazine is
    /// full it goes back to the allocator and the segment starts a new one.
    fn free_segment(&mut self, segment: Segment<'a>) {
        match self.magazine.take() {
            None => self.magazine = Some(segment.into_magazine()),
            Some(mut magazine) => match magazine.push(segment) {
                Ok(()) => self.magazine = Some(magazine),
                Err(segment) => {
                    self.allocator.free_magazine(magazine);
                    self.magazine = Some(segment.into_magazine());
                }
            },
        }
    }
}

impl Drop for ThreadLocalStacks<'_> {
    fn drop(&mut self) {
        self.flush();
        self.free();
    }
}

impl fmt::Debug for ThreadLocalStacks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached: Vec<_> = self
            .cached
            .iter()
            .enumerate()
            .filter_map(|(stripe, segment)| segment.as_ref().map(|s| (stripe, s.len())))
            .collect();
        f.debug_struct("ThreadLocalStacks")
            .field("cached", &cached)
            .field("magazine", &self.magazine)
            .finish_non_exhaustive()
    }
}
