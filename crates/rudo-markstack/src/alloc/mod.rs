//! Memory backing the mark stacks.
//!
//! - [`arena`]: growable bump allocator over one reserved address range
//! - [`allocator`]: magazine allocator layered on the arena

pub mod allocator;
pub mod arena;
