//! Per-cycle mark stack configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::alloc::allocator::MAGAZINE_CHUNK_BYTES;
use crate::error::ConfigError;
use crate::stack::segment::{SlotIndex, SLOT_SIZE};
use crate::stack::stripe::MAX_STRIPES;

/// Default address shift for stripe routing (2MB granules).
pub const DEFAULT_STRIPE_SHIFT: u32 = 21;
/// Default hard limit on arena size.
pub const DEFAULT_ARENA_LIMIT: usize = 1 << 30;
/// Default amount of memory committed per arena expansion.
pub const DEFAULT_EXPAND_CHUNK: usize = 1 << 20;

/// Configuration for one marking cycle.
///
/// Worker count, stripe count and stripe shift are fixed for the duration of
/// a cycle. The arena settings bound the memory backing all mark stacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkStackConfig {
    /// Number of parallel marking workers.
    pub workers: usize,
    /// Number of stripes; a power of two no larger than [`MAX_STRIPES`].
    pub stripes: usize,
    /// Right shift applied to object addresses before stripe masking.
    pub stripe_shift: u32,
    /// Hard limit on arena size in bytes. Exceeding it aborts the cycle.
    pub arena_limit: usize,
    /// Bytes committed per arena expansion, rounded up to the page size.
    pub expand_chunk: usize,
    /// Publish local stacks early once this much time has passed since the
    /// last flush. `None` disables proactive flushing.
    pub flush_timeout: Option<Duration>,
}

impl Default for MarkStackConfig {
    fn default() -> Self {
        let workers = available_parallelism();
        Self {
            workers,
            stripes: Self::stripes_for_workers(workers),
            stripe_shift: DEFAULT_STRIPE_SHIFT,
            arena_limit: DEFAULT_ARENA_LIMIT,
            expand_chunk: DEFAULT_EXPAND_CHUNK,
            flush_timeout: None,
        }
    }
}

impl MarkStackConfig {
    /// Create a configuration for `workers` workers with a matching stripe count.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            stripes: Self::stripes_for_workers(workers),
            ..Default::default()
        }
    }

    /// Largest power of two not above `workers`, capped at [`MAX_STRIPES`].
    #[must_use]
    pub const fn stripes_for_workers(workers: usize) -> usize {
        if workers <= 1 {
            return 1;
        }
        let rounded = 1 << (usize::BITS - 1 - workers.leading_zeros());
        if rounded > MAX_STRIPES {
            MAX_STRIPES
        } else {
            rounded
        }
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the stripe count.
    #[must_use]
    pub const fn with_stripes(mut self, stripes: usize) -> Self {
        self.stripes = stripes;
        self
    }

    /// Set the stripe routing shift.
    #[must_use]
    pub const fn with_stripe_shift(mut self, shift: u32) -> Self {
        self.stripe_shift = shift;
        self
    }

    /// Set the arena hard limit and expansion chunk.
    #[must_use]
    pub const fn with_arena(mut self, limit: usize, expand_chunk: usize) -> Self {
        self.arena_limit = limit;
        self.expand_chunk = expand_chunk;
        self
    }

    /// Set the proactive flush timeout.
    #[must_use]
    pub const fn with_flush_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Smallest arena limit that can hold one magazine chunk.
    #[must_use]
    pub const fn min_arena_limit() -> usize {
        MAGAZINE_CHUNK_BYTES
    }

    /// Largest arena limit a [`SlotIndex`] can address.
    #[must_use]
    pub const fn max_arena_limit() -> usize {
        (SlotIndex::MAX as usize).saturating_mul(SLOT_SIZE)
    }

    /// Check the configuration for shape errors.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.stripes == 0 || !self.stripes.is_power_of_two() || self.stripes > MAX_STRIPES {
            return Err(ConfigError::InvalidStripeCount(self.stripes));
        }
        if self.stripe_shift >= usize::BITS {
            return Err(ConfigError::InvalidStripeShift(self.stripe_shift));
        }
        if self.expand_chunk == 0 {
            return Err(ConfigError::ZeroExpandChunk);
        }
        if self.arena_limit < Self::min_arena_limit() {
            return Err(ConfigError::ArenaTooSmall {
                limit: self.arena_limit,
                minimum: Self::min_arena_limit(),
            });
        }
        if self.arena_limit > Self::max_arena_limit() {
            return Err(ConfigError::ArenaTooLarge {
                limit: self.arena_limit,
                maximum: Self::max_arena_limit(),
            });
        }
        Ok(())
    }
}

/// Get the number of CPUs available for parallel marking.
#[must_use]
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = MarkStackConfig::default();
        assert!(config.workers >= 1);
        assert!(config.stripes.is_power_of_two());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_stripes_for_workers() {
        assert_eq!(MarkStackConfig::stripes_for_workers(0), 1);
        assert_eq!(MarkStackConfig::stripes_for_workers(1), 1);
        assert_eq!(MarkStackConfig::stripes_for_workers(3), 2);
        assert_eq!(MarkStackConfig::stripes_for_workers(4), 4);
        assert_eq!(MarkStackConfig::stripes_for_workers(7), 4);
        assert_eq!(MarkStackConfig::stripes_for_workers(64), MAX_STRIPES);
    }

    #[test]
    fn test_new_clamps_workers() {
        let config = MarkStackConfig::new(0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.stripes, 1);
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let base = MarkStackConfig::new(4);
        assert_eq!(
            base.with_workers(0).validate(),
            Err(ConfigError::NoWorkers)
        );
        assert_eq!(
            base.with_stripes(3).validate(),
            Err(ConfigError::InvalidStripeCount(3))
        );
        assert_eq!(
            base.with_stripes(MAX_STRIPES * 2).validate(),
            Err(ConfigError::InvalidStripeCount(MAX_STRIPES * 2))
        );
        assert_eq!(
            base.with_stripe_shift(usize::BITS).validate(),
            Err(ConfigError::InvalidStripeShift(usize::BITS))
        );
        assert_eq!(
            base.with_arena(DEFAULT_ARENA_LIMIT, 0).validate(),
            Err(ConfigError::ZeroExpandChunk)
        );
        assert!(matches!(
            base.with_arena(SLOT_SIZE, DEFAULT_EXPAND_CHUNK).validate(),
            Err(ConfigError::ArenaTooSmall { .. })
        ));
    }
}
