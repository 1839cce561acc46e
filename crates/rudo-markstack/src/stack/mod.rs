//! Work entries, segments and the lists and stripes that share them.

pub mod entry;
pub(crate) mod list;
pub mod local;
pub mod segment;
pub mod stripe;

#[cfg(all(test, loom))]
mod loom_tests;
