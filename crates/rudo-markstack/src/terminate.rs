//! Two-stage termination barrier.
//!
//! Each stage is a countdown of workers still active in that stage. A worker
//! that runs out of work enters stage 0; once every worker has done so they
//! move on to stage 1, which re-confirms quiescence against publications that
//! were not yet visible during stage 0. A worker that finds more work backs
//! out of both stages and negotiation starts over.
//!
//! ```text
//! Active --enter0--> Stage0 --enter1--> Stage1 --last enter1--> Terminated
//!   ^                  |                  |
//!   +-----try_exit0----+<----try_exit1----+
//! ```

use crossbeam::utils::CachePadded;

use crate::sync::atomic::{AtomicUsize, Ordering};

/// Countdown counters for the two termination stages.
#[derive(Debug)]
pub struct TerminationBarrier {
    stage0: CachePadded<AtomicUsize>,
    stage1: CachePadded<AtomicUsize>,
}

impl TerminationBarrier {
    /// Create a barrier for `nworkers` workers.
    #[must_use]
    pub fn new(nworkers: usize) -> Self {
        Self {
            stage0: CachePadded::new(AtomicUsize::new(nworkers)),
            stage1: CachePadded::new(AtomicUsize::new(nworkers)),
        }
    }

    /// Restart both stages for `nworkers` workers.
    ///
    /// Must not race with any worker using the barrier.
    pub fn reset(&self, nworkers: usize) {
        self.stage0.store(nworkers, Ordering::Release);
        self.stage1.store(nworkers, Ordering::Release);
    }

    /// Enter stage 0. Returns `true` to the one worker that completes it.
    pub fn enter_stage0(&self) -> bool {
        Self::enter(&self.stage0)
    }

    /// Leave stage 0 unconditionally.
    pub fn exit_stage0(&self) {
        Self::exit(&self.stage0);
    }

    /// Leave stage 0 unless it has already completed.
    pub fn try_exit_stage0(&self) -> bool {
        Self::try_exit(&self.stage0)
    }

    /// Enter stage 1. Returns `true` to the one worker that completes it.
    pub fn enter_stage1(&self) -> bool {
        Self::enter(&self.stage1)
    }

    /// Leave stage 1 unconditionally.
    pub fn exit_stage1(&self) {
        Self::exit(&self.stage1);
    }

    /// Leave stage 1 unless it has already completed.
    pub fn try_exit_stage1(&self) -> bool {
        Self::try_exit(&self.stage1)
    }

    fn enter(stage: &AtomicUsize) -> bool {
        let previous = stage.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(previous, 0, "more workers entered than registered");
        previous == 1
    }

    fn exit(stage: &AtomicUsize) {
        stage.fetch_add(1, Ordering::AcqRel);
    }

    /// Increment unless zero. A completed stage must stay completed: workers
    /// may already have acted on it.
    fn try_exit(stage: &AtomicUsize) -> bool {
        let mut active = stage.load(Ordering::Acquire);
        loop {
            if active == 0 {
                return false;
            }
            match stage.compare_exchange_weak(
                active,
                active + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => active = current,
            }
        }
    }
}
