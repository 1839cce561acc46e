//! Synchronization primitive shim.
//!
//! Under `cfg(loom)` the atomics come from `loom` so model tests can explore
//! every interleaving; otherwise they are the `std` types. Modules import
//! atomics through here, never from `std::sync::atomic` directly.

pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
}
