//! Concurrent mark stacks for a parallel tracing garbage collector.
//!
//! `rudo-markstack` is the work-distribution substrate of a parallel marking
//! phase. Workers push the references they discover into private segments,
//! share full segments through lock-free lists, steal from each other when
//! they run dry, and agree on termination through a two-stage barrier.
//!
//! # Architecture
//!
//! - [`WorkEntry`]: one tagged word, either an object or a partial-array task
//! - [`Segment`]: fixed-capacity LIFO of entries, owned by one thread at a time
//! - [`Magazine`]: batch of empty segments, sharing a segment's arena slot
//! - [`Arena`] / [`MarkStackAllocator`]: growable bump arena with a hard limit
//!   and a magazine free list on top
//! - [`StripeSet`]: address-partitioned published/overflowed segment lists
//! - [`ThreadLocalStacks`]: one worker's private segment per stripe
//! - [`TerminationBarrier`]: two-stage quiescence detection
//! - [`MarkStacks`] / [`MarkWorker`]: per-cycle context and worker driver
//!
//! # Quick Start
//!
//! ```
//! use rudo_markstack::{MarkStackConfig, MarkStacks, WorkEntry};
//!
//! let stacks = MarkStacks::new(MarkStackConfig::new(1).with_arena(1 << 24, 1 << 20))?;
//! let mut worker = stacks.worker(0);
//! worker.push_object(WorkEntry::object(0x1000, true, false, true, false), true)?;
//!
//! let visited = worker.run(|entry, _worker| {
//!     assert_eq!(entry.object_address(), 0x1000);
//!     Ok(())
//! })?;
//! assert_eq!(visited, 1);
//! # Ok::<(), rudo_markstack::MarkStackError>(())
//! ```
//!
//! # Errors
//!
//! Contention and local exhaustion are handled internally. The only error a
//! running cycle can raise is [`MarkStackError::ArenaExhausted`]. The worker
//! that hits it aborts the cycle, every other worker returns
//! [`MarkStackError::Aborted`], and [`MarkStacks::end_cycle`] then resets the
//! shared state.
//!
//! # Features
//!
//! - `tracing`: debug-level spans and events for arena growth, flushes and
//!   termination, plus an error event on arena exhaustion.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod alloc;
pub mod config;
mod context;
pub mod error;
pub mod metrics;
pub mod stack;
mod sync;
mod terminate;
mod worker;

#[cfg(feature = "tracing")]
mod tracing;

pub use alloc::allocator::MarkStackAllocator;
pub use alloc::arena::Arena;
pub use config::MarkStackConfig;
pub use context::MarkStacks;
pub use error::{ConfigError, MarkStackError};
pub use metrics::{MarkStackMetrics, MarkStackStats};
pub use stack::entry::WorkEntry;
pub use stack::local::ThreadLocalStacks;
pub use stack::segment::{Magazine, Segment, SlotIndex, MAGAZINE_CAPACITY, SEGMENT_CAPACITY};
pub use stack::stripe::{Stripe, StripeId, StripeSet, MAX_STRIPES};
pub use terminate::TerminationBarrier;
pub use worker::{MarkWorker, PROACTIVE_FLUSH_CHECK_INTERVAL};
