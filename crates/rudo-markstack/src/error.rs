//! Error types for mark stack configuration and allocation.

use std::fmt;
use std::io;

/// Errors that cross the mark stack boundary.
///
/// Contention and local exhaustion are handled internally and never show up
/// here. [`MarkStackError::ArenaExhausted`] is fatal for the current marking
/// cycle: there is no partial-marking mode, so the caller must abort the
/// cycle instead of retrying.
#[derive(Debug)]
pub enum MarkStackError {
    /// The arena would grow past its configured hard limit.
    ArenaExhausted {
        /// Bytes requested by the failing allocation.
        requested: usize,
        /// Bytes already handed out.
        used: usize,
        /// Configured hard limit in bytes.
        limit: usize,
    },
    /// Another worker hit a fatal error, or the cycle was aborted through
    /// [`MarkStacks::abort`](crate::MarkStacks::abort).
    Aborted,
    /// Reserving the arena's address range failed.
    Reserve(io::Error),
    /// Committing another expansion chunk failed.
    Commit(io::Error),
    /// Returning unused pages to the OS failed.
    Decommit(io::Error),
    /// The configuration was rejected.
    Config(ConfigError),
}

impl MarkStackError {
    /// Whether the error must abort the marking cycle.
    ///
    /// Everything except a rejected configuration happens mid-cycle and
    /// leaves the mark stacks unable to accept more work.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

impl fmt::Display for MarkStackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArenaExhausted {
                requested,
                used,
                limit,
            } => write!(
                f,
                "mark stack arena exhausted: requested {requested} bytes with {used} of {limit} bytes in use"
            ),
            Self::Aborted => write!(f, "marking cycle aborted"),
            Self::Reserve(e) => write!(f, "mark stack arena reservation failed: {e}"),
            Self::Commit(e) => write!(f, "mark stack arena commit failed: {e}"),
            Self::Decommit(e) => write!(f, "mark stack arena decommit failed: {e}"),
            Self::Config(e) => write!(f, "invalid mark stack configuration: {e}"),
        }
    }
}

impl std::error::Error for MarkStackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reserve(e) | Self::Commit(e) | Self::Decommit(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::ArenaExhausted { .. } | Self::Aborted => None,
        }
    }
}

impl From<ConfigError> for MarkStackError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Reasons a [`MarkStackConfig`](crate::MarkStackConfig) is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one worker is required.
    NoWorkers,
    /// Stripe count must be a power of two in `1..=MAX_STRIPES`.
    InvalidStripeCount(usize),
    /// Stripe shift must leave at least one address bit.
    InvalidStripeShift(u32),
    /// Expansion chunk must be non-zero.
    ZeroExpandChunk,
    /// The arena cannot hold even a single magazine.
    ArenaTooSmall {
        /// Configured limit.
        limit: usize,
        /// Smallest usable limit.
        minimum: usize,
    },
    /// The arena has more slots than a slot index can address.
    ArenaTooLarge {
        /// Configured limit.
        limit: usize,
        /// Largest addressable limit.
        maximum: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoWorkers => write!(f, "worker count must be at least 1"),
            Self::InvalidStripeCount(n) => write!(
                f,
                "stripe count {n} must be a power of two between 1 and {}",
                crate::stack::stripe::MAX_STRIPES
            ),
            Self::InvalidStripeShift(shift) => {
                write!(f, "stripe shift {shift} leaves no address bits")
            }
            Self::ZeroExpandChunk => write!(f, "arena expansion chunk must be non-zero"),
            Self::ArenaTooSmall { limit, minimum } => write!(
                f,
                "arena limit {limit} is below the minimum of {minimum} bytes"
            ),
            Self::ArenaTooLarge { limit, maximum } => write!(
                f,
                "arena limit {limit} exceeds the addressable maximum of {maximum} bytes"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_exhausted_is_fatal() {
        let err = MarkStackError::ArenaExhausted {
            requested: 64,
            used: 128,
            limit: 128,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("exhausted"));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_aborted_is_fatal() {
        let err = MarkStackError::Aborted;
        assert!(err.is_fatal());
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "marking cycle aborted");
    }

    #[test]
    fn test_config_error_is_not_fatal() {
        let err = MarkStackError::from(ConfigError::NoWorkers);
        assert!(!err.is_fatal());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_commit_error_source() {
        let err = MarkStackError::Commit(io::Error::from(io::ErrorKind::OutOfMemory));
        assert!(err.is_fatal());
        assert!(err.source().is_some());
    }
}
