//! Mark stack tracing support.
//!
//! Only compiled with the `tracing` feature. Call sites are gated the same
//! way, so disabled builds carry no logging code at all.

use ::tracing::{debug, error, span, Level};

/// Span covering one worker's marking loop.
pub fn span_mark_cycle(worker_id: usize, home_stripe: usize) -> span::EnteredSpan {
    span!(
        Level::DEBUG,
        "mark_cycle",
        worker_id = worker_id,
        home_stripe = home_stripe
    )
    .entered()
}

/// The arena committed another chunk.
pub fn log_arena_expand(committed: usize, limit: usize) {
    debug!(committed, limit, "arena_expand");
}

/// The arena gave memory back at cycle end.
pub fn log_arena_shrink(used: usize, kept: usize, committed: usize) {
    debug!(used, kept, released = committed - kept, "arena_shrink");
}

/// An allocation would cross the hard limit. The cycle must be aborted.
pub fn log_arena_exhausted(requested: usize, used: usize, limit: usize) {
    error!(requested, used, limit, "arena_exhausted");
}

/// A worker published its private segments.
pub fn log_flush(segments: usize) {
    debug!(segments, "flush");
}

/// A worker agreed to terminate.
pub fn log_terminate(worker_id: usize, visited: usize) {
    debug!(worker_id, visited, "terminate");
}

/// A cycle ended and its shared state was reset.
pub fn log_end_cycle(used: usize, committed: usize) {
    debug!(used, committed, "end_cycle");
}
