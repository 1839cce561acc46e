//! Marking worker driver.
//!
//! A [`MarkWorker`] wraps one thread's [`ThreadLocalStacks`] with the
//! drain, steal, flush and terminate loop every marking worker runs:
//!
//! 1. Drain the home stripe, private segment first, then its shared lists.
//! 2. Steal from the other stripes, draining whichever one yields work.
//! 3. Flush private segments of other stripes so their entries become
//!    stealable, and go back to 1 if anything was published.
//! 4. Negotiate termination. Any worker that still sees work backs out and
//!    goes back to 1.

use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;

use crate::context::MarkStacks;
use crate::error::MarkStackError;
use crate::stack::entry::WorkEntry;
use crate::stack::local::ThreadLocalStacks;
use crate::stack::stripe::{StripeId, StripeSet};
use crate::terminate::TerminationBarrier;

/// Entries visited between checks of the proactive flush timer and the
/// abort flag.
pub const PROACTIVE_FLUSH_CHECK_INTERVAL: usize = 256;

/// Per-thread marking driver.
#[derive(Debug)]
pub struct MarkWorker<'a> {
    id: usize,
    home: StripeId,
    stacks: ThreadLocalStacks<'a>,
    shared: &'a MarkStacks,
    flush_timeout: Option<Duration>,
    last_flush: Instant,
}

impl<'a> MarkWorker<'a> {
    pub(crate) fn new(id: usize, home: StripeId, shared: &'a MarkStacks) -> Self {
        Self {
            id,
            home,
            stacks: shared.local_stacks(),
            shared,
            flush_timeout: shared.config().flush_timeout,
            last_flush: Instant::now(),
        }
    }

    /// Worker id.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Stripe this worker drains first.
    #[must_use]
    pub const fn home_stripe(&self) -> StripeId {
        self.home
    }

    /// The shared stripe set, for routing addresses.
    #[must_use]
    pub const fn stripes(&self) -> &'a StripeSet {
        self.shared.stripes()
    }

    /// The shared termination barrier.
    #[must_use]
    pub const fn barrier(&self) -> &'a TerminationBarrier {
        self.shared.barrier()
    }

    /// See [`ThreadLocalStacks::push`].
    ///
    /// # Errors
    ///
    /// Propagates arena exhaustion.
    #[inline]
    pub fn push(
        &mut self,
        stripe: StripeId,
        entry: WorkEntry,
        publish: bool,
    ) -> Result<(), MarkStackError> {
        self.stacks.push(stripe, entry, publish)
    }

    /// Push an object entry onto the stripe owning its address.
    ///
    /// # Errors
    ///
    /// Propagates arena exhaustion.
    pub fn push_object(&mut self, entry: WorkEntry, publish: bool) -> Result<(), MarkStackError> {
        debug_assert!(!entry.is_partial_array(), "partial arrays carry no address");
        let stripe = self.stripes().stripe_for_addr(entry.object_address());
        self.stacks.push(stripe, entry, publish)
    }

    /// See [`ThreadLocalStacks::pop`].
    #[inline]
    pub fn pop(&mut self, stripe: StripeId) -> Option<WorkEntry> {
        self.stacks.pop(stripe)
    }

    /// See [`ThreadLocalStacks::try_steal`].
    pub fn try_steal(&mut self, stripe: StripeId) -> Option<WorkEntry> {
        self.stacks.try_steal(stripe)
    }

    /// Publish private segments and restart the flush timer.
    pub fn flush(&mut self) -> bool {
        self.last_flush = Instant::now();
        self.stacks.flush()
    }

    /// Steal one entry from any stripe other than home, walking them in
    /// round-robin order. Returns the stripe it came from.
    pub fn try_steal_any(&mut self) -> Option<(StripeId, WorkEntry)> {
        let stripes = self.stripes();
        let mut stripe = stripes.stripe_next(self.home);
        while stripe != self.home {
            if let Some(entry) = self.stacks.try_steal(stripe) {
                return Some((stripe, entry));
            }
            stripe = stripes.stripe_next(stripe);
        }
        None
    }

    /// Flush early if the configured timeout has passed since the last
    /// flush. Returns whether anything was published.
    pub fn try_proactive_flush(&mut self) -> bool {
        let Some(timeout) = self.flush_timeout else {
            return false;
        };
        if self.last_flush.elapsed() < timeout {
            return false;
        }
        let flushed = self.flush();
        if flushed {
            self.shared.counters().record_proactive_flush();
        }
        flushed
    }

    /// Run the two-stage termination protocol once.
    ///
    /// The caller must hold no private work. Returns `true` when every
    /// worker agreed that marking is done or the cycle was aborted, and
    /// `false` when shared work showed up and this worker should go and
    /// take it. Idles in between.
    pub fn try_terminate(&mut self) -> bool {
        debug_assert!(self.stacks.is_empty(), "terminating with private work");
        self.shared.counters().record_termination_round();
        let barrier = self.barrier();
        barrier.enter_stage0();

        let backoff = Backoff::new();
        loop {
            if barrier.enter_stage1() {
                return true;
            }

            // Give the others a chance to enter.
            backoff.snooze();

            if !barrier.try_exit_stage1() {
                return true;
            }
            // A failed worker never enters, so nobody would complete.
            if self.shared.is_aborted() {
                return true;
            }
            // Only back out when there is something to take.
            if !self.stripes().is_empty() && barrier.try_exit_stage0() {
                return false;
            }
        }
    }

    /// Drive marking until every worker terminates.
    ///
    /// `visit` is called once per entry and may push new work through the
    /// worker it is handed. Returns the number of entries this worker
    /// visited.
    ///
    /// # Errors
    ///
    /// Stops at the first error from `visit`, typically arena exhaustion,
    /// and aborts the cycle through [`MarkStacks::abort`]. The other
    /// workers then return [`MarkStackError::Aborted`]. Call
    /// [`MarkStacks::end_cycle`] once all of them are done.
    pub fn run<F>(&mut self, visit: F) -> Result<usize, MarkStackError>
    where
        F: FnMut(WorkEntry, &mut Self) -> Result<(), MarkStackError>,
    {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::span_mark_cycle(self.id, self.home.index());

        let result = self.mark(visit);
        if result.is_err() {
            self.shared.abort();
        }
        result
    }

    fn mark<F>(&mut self, mut visit: F) -> Result<usize, MarkStackError>
    where
        F: FnMut(WorkEntry, &mut Self) -> Result<(), MarkStackError>,
    {
        let mut visited = 0;
        loop {
            self.check_aborted()?;
            visited += self.drain(self.home, &mut visit)?;

            if let Some((stripe, entry)) = self.try_steal_any() {
                visit(entry, self)?;
                visited += 1;
                visited += self.drain(stripe, &mut visit)?;
                continue;
            }

            if self.flush() {
                continue;
            }

            if self.try_terminate() {
                self.check_aborted()?;
                #[cfg(feature = "tracing")]
                crate::tracing::log_terminate(self.id, visited);
                return Ok(visited);
            }
        }
    }

    fn drain<F>(&mut self, stripe: StripeId, visit: &mut F) -> Result<usize, MarkStackError>
    where
        F: FnMut(WorkEntry, &mut Self) -> Result<(), MarkStackError>,
    {
        let mut visited = 0;
        while let Some(entry) = self.stacks.pop(stripe) {
            visit(entry, self)?;
            visited += 1;
            if visited % PROACTIVE_FLUSH_CHECK_INTERVAL == 0 {
                self.check_aborted()?;
                self.try_proactive_flush();
            }
        }
        Ok(visited)
    }

    fn check_aborted(&self) -> Result<(), MarkStackError> {
        if self.shared.is_aborted() {
            Err(MarkStackError::Aborted)
        } else {
            Ok(())
        }
    }
}
