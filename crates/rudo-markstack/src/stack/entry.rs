//! Bit-packed mark stack entries.
//!
//! Every entry is a single 64-bit word. Bit 1 selects the layout and bit 0
//! (finalizable) is shared by both:
//!
//! ```text
//! Object entry
//!  63                                                          5   4   3   2   1   0
//! +-------------------------------------------------------------+---+---+---+---+---+
//! |                    object address (59 bits)                 | M | I | F | 0 | Z |
//! +-------------------------------------------------------------+---+---+---+---+---+
//!   M = needs mark, I = increment live, F = follow fields, Z = finalizable
//!
//! Partial array entry
//!  63                        32 31                             2   1   0
//! +----------------------------+--------------------------------+---+---+
//! |  remaining length (32 bits) |   array offset (30 bits)       | 1 | Z |
//! +----------------------------+--------------------------------+---+---+
//! ```

use std::fmt;

const FINALIZABLE_BIT: u64 = 1 << 0;
const PARTIAL_ARRAY_BIT: u64 = 1 << 1;
const FOLLOW_BIT: u64 = 1 << 2;
const INC_LIVE_BIT: u64 = 1 << 3;
const MARK_BIT: u64 = 1 << 4;

const ADDRESS_SHIFT: u32 = 5;
const ADDRESS_BITS: u32 = 59;

const OFFSET_SHIFT: u32 = 2;
const OFFSET_BITS: u32 = 30;
const LENGTH_SHIFT: u32 = 32;
const LENGTH_BITS: u32 = 32;

/// A unit of marking work: an object to visit or a slice of an array.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct WorkEntry(u64);

impl WorkEntry {
    /// Largest object address an entry can hold.
    pub const MAX_ADDRESS: usize = ((1u64 << ADDRESS_BITS) - 1) as usize;
    /// Largest partial array offset an entry can hold.
    pub const MAX_OFFSET: usize = (1 << OFFSET_BITS) - 1;
    /// Largest partial array length an entry can hold.
    pub const MAX_LENGTH: usize = ((1u64 << LENGTH_BITS) - 1) as usize;

    pub(crate) const EMPTY: Self = Self(0);

    /// Build an object entry.
    ///
    /// `address` must not exceed [`WorkEntry::MAX_ADDRESS`]; this is only
    /// checked in debug builds.
    #[must_use]
    pub const fn object(
        address: usize,
        mark: bool,
        inc_live: bool,
        follow: bool,
        finalizable: bool,
    ) -> Self {
        debug_assert!(address <= Self::MAX_ADDRESS, "object address too wide");
        let mut bits = (address as u64) << ADDRESS_SHIFT;
        if mark {
            bits |= MARK_BIT;
        }
        if inc_live {
            bits |= INC_LIVE_BIT;
        }
        if follow {
            bits |= FOLLOW_BIT;
        }
        if finalizable {
            bits |= FINALIZABLE_BIT;
        }
        Self(bits)
    }

    /// Build a partial array entry covering `length` elements from `offset`.
    ///
    /// Field widths are only checked in debug builds.
    #[must_use]
    pub const fn partial_array(offset: usize, length: usize, finalizable: bool) -> Self {
        debug_assert!(offset <= Self::MAX_OFFSET, "partial array offset too wide");
        debug_assert!(length <= Self::MAX_LENGTH, "partial array length too wide");
        let mut bits = ((length as u64) << LENGTH_SHIFT)
            | ((offset as u64) << OFFSET_SHIFT)
            | PARTIAL_ARRAY_BIT;
        if finalizable {
            bits |= FINALIZABLE_BIT;
        }
        Self(bits)
    }

    /// Reconstruct an entry from its raw word.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw encoded word.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is a partial array entry.
    #[must_use]
    pub const fn is_partial_array(self) -> bool {
        self.0 & PARTIAL_ARRAY_BIT != 0
    }

    /// Whether the referenced object is finalizable. Valid for both layouts.
    #[must_use]
    pub const fn finalizable(self) -> bool {
        self.0 & FINALIZABLE_BIT != 0
    }

    /// Object address. Only meaningful for object entries.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn object_address(self) -> usize {
        debug_assert!(!self.is_partial_array());
        (self.0 >> ADDRESS_SHIFT) as usize
    }

    /// Whether the object still needs its mark bit set.
    #[must_use]
    pub const fn mark(self) -> bool {
        debug_assert!(!self.is_partial_array());
        self.0 & MARK_BIT != 0
    }

    /// Whether marking should account the object's size as live.
    #[must_use]
    pub const fn inc_live(self) -> bool {
        debug_assert!(!self.is_partial_array());
        self.0 & INC_LIVE_BIT != 0
    }

    /// Whether the object's fields should be followed.
    #[must_use]
    pub const fn follow(self) -> bool {
        debug_assert!(!self.is_partial_array());
        self.0 & FOLLOW_BIT != 0
    }

    /// Array offset. Only meaningful for partial array entries.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn partial_array_offset(self) -> usize {
        debug_assert!(self.is_partial_array());
        ((self.0 >> OFFSET_SHIFT) & ((1 << OFFSET_BITS) - 1)) as usize
    }

    /// Remaining length. Only meaningful for partial array entries.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn partial_array_length(self) -> usize {
        debug_assert!(self.is_partial_array());
        (self.0 >> LENGTH_SHIFT) as usize
    }
}

impl fmt::Debug for WorkEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_partial_array() {
            f.debug_struct("PartialArray")
                .field("offset", &self.partial_array_offset())
                .field("length", &self.partial_array_length())
                .field("finalizable", &self.finalizable())
                .finish()
        } else {
            f.debug_struct("Object")
                .field("address", &format_args!("{:#x}", self.object_address()))
                .field("mark", &self.mark())
                .field("inc_live", &self.inc_live())
                .field("follow", &self.follow())
                .field("finalizable", &self.finalizable())
                .finish()
        }
    }
}
