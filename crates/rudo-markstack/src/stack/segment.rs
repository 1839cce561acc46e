//! Arena slots and their two interpretations: segments and magazines.
//!
//! Every slot carved from the arena has the same footprint. It holds either
//! a [`Segment`] (a fixed-capacity LIFO of [`WorkEntry`] values) or a
//! [`Magazine`] (a batch of empty segment handles). Which one is recorded in
//! the slot's tagged body; switching interpretation goes through the
//! consuming conversions [`Segment::into_magazine`] and
//! [`Magazine::into_segment`].
//!
//! # Ownership
//!
//! `Segment` and `Magazine` are unique, non-`Clone` owner tokens. While a
//! token exists, its holder has exclusive access to the slot body. Pushing a
//! token onto a [`LockFreeList`](super::list::LockFreeList) gives up that
//! access; popping it back creates a fresh token for exactly one thread.
//! Other threads only ever touch a slot's `next` link, which is atomic.

use std::cell::UnsafeCell;
use std::fmt;

use super::entry::WorkEntry;
use crate::alloc::arena::Arena;
use crate::sync::atomic::{AtomicU32, Ordering};

/// Entries per segment.
pub const SEGMENT_CAPACITY: usize = 254;
/// Segment handles per magazine.
pub const MAGAZINE_CAPACITY: usize = 64;
/// Bytes occupied by one arena slot.
pub const SLOT_SIZE: usize = std::mem::size_of::<Slot>();
/// Alignment of an arena slot.
pub const SLOT_ALIGN: usize = std::mem::align_of::<Slot>();

/// Arena-relative index of a slot.
///
/// The index is the slot's byte offset from the arena base divided by
/// [`SLOT_SIZE`]. It fits in 32 bits so that it can share a word with a
/// version counter in lock-free list heads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotIndex(u32);

impl SlotIndex {
    /// Reserved raw value meaning "no slot".
    pub(crate) const NIL: u32 = u32::MAX;
    /// Largest number of addressable slots.
    pub const MAX: u32 = Self::NIL;

    /// Convert an arena byte offset into a slot index.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not slot aligned or does not fit an index.
    #[must_use]
    pub(crate) fn from_offset(offset: usize) -> Self {
        assert_eq!(offset % SLOT_SIZE, 0, "offset {offset:#x} is not slot aligned");
        let index = offset / SLOT_SIZE;
        let index = u32::try_from(index)
            .ok()
            .filter(|&i| i < Self::NIL)
            .unwrap_or_else(|| panic!("offset {offset:#x} exceeds slot index range"));
        Self(index)
    }

    pub(crate) const fn from_raw(raw: u32) -> Option<Self> {
        if raw == Self::NIL {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub(crate) const fn raw(self) -> u32 {
        self.0
    }

    /// Byte offset of this slot from the arena base.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0 as usize * SLOT_SIZE
    }

    #[must_use]
    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotIndex({})", self.0)
    }
}

pub(crate) struct SegmentBody {
    len: u32,
    entries: [WorkEntry; SEGMENT_CAPACITY],
}

impl SegmentBody {
    const fn new() -> Self {
        Self {
            len: 0,
            entries: [WorkEntry::EMPTY; SEGMENT_CAPACITY],
        }
    }
}

pub(crate) struct MagazineBody {
    len: u32,
    segments: [SlotIndex; MAGAZINE_CAPACITY],
}

impl MagazineBody {
    const fn new() -> Self {
        Self {
            len: 0,
            segments: [SlotIndex(SlotIndex::NIL); MAGAZINE_CAPACITY],
        }
    }
}

pub(crate) enum SlotBody {
    Segment(SegmentBody),
    Magazine(MagazineBody),
}

/// One arena slot: an atomic list link plus a tagged body.
pub struct Slot {
    next: AtomicU32,
    body: UnsafeCell<SlotBody>,
}

// SAFETY: `next` is atomic. `body` is only accessed through the unique
// `Segment`/`Magazine` token that currently owns the slot, and ownership
// hand-off goes through an acquire/release CAS on a list head.
unsafe impl Sync for Slot {}

impl Slot {
    /// Write a fresh slot holding an empty segment.
    ///
    /// # Safety
    ///
    /// `ptr` must point to committed, slot-aligned arena memory that no
    /// other thread can observe yet.
    pub(crate) unsafe fn init_segment(ptr: *mut Self) {
        // SAFETY: caller guarantees the memory is valid and unshared.
        unsafe {
            ptr.write(Self {
                next: AtomicU32::new(SlotIndex::NIL),
                body: UnsafeCell::new(SlotBody::Segment(SegmentBody::new())),
            });
        }
    }

    /// Write a fresh slot holding a magazine loaded with `segments`.
    ///
    /// # Safety
    ///
    /// Same as [`Slot::init_segment`]. Every index in `segments` must refer
    /// to an initialised, unowned segment slot.
    pub(crate) unsafe fn init_magazine(ptr: *mut Self, segments: impl Iterator<Item = SlotIndex>) {
        let mut body = MagazineBody::new();
        for index in segments {
            let len = body.len as usize;
            assert!(len < MAGAZINE_CAPACITY, "too many segments for one magazine");
            body.segments[len] = index;
            body.len += 1;
        }
        // SAFETY: caller guarantees the memory is valid and unshared.
        unsafe {
            ptr.write(Self {
                next: AtomicU32::new(SlotIndex::NIL),
                body: UnsafeCell::new(SlotBody::Magazine(body)),
            });
        }
    }

    pub(crate) fn load_next(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    pub(crate) fn store_next(&self, next: u32) {
        self.next.store(next, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// The caller must own the slot's token.
    unsafe fn body(&self) -> &SlotBody {
        // SAFETY: the owning token grants exclusive access to the body.
        unsafe { &*self.body.get() }
    }

    /// # Safety
    ///
    /// The caller must own the slot's token and hold no other body reference.
    #[allow(clippy::mut_from_ref)]
    unsafe fn body_mut(&self) -> &mut SlotBody {
        // SAFETY: the owning token grants exclusive access to the body.
        unsafe { &mut *self.body.get() }
    }
}

/// A node that can be linked into a [`LockFreeList`](super::list::LockFreeList).
pub(crate) trait ListNode<'a>: Sized {
    /// The slot backing this node.
    fn slot(&self) -> &'a Slot;

    /// Give up ownership, leaving only the index behind.
    fn into_index(self) -> SlotIndex;

    /// Recreate the owner token for a slot popped from a list.
    ///
    /// # Safety
    ///
    /// `index` must have come from `into_index` on the same node type and
    /// arena, and must have been popped by exactly one caller.
    unsafe fn from_index(arena: &'a Arena, index: SlotIndex) -> Self;
}

/// A fixed-capacity stack of work entries owned by one thread.
pub struct Segment<'a> {
    index: SlotIndex,
    slot: &'a Slot,
}

impl<'a> Segment<'a> {
    /// # Safety
    ///
    /// The slot must hold a segment body and the caller must be its only owner.
    pub(crate) unsafe fn from_slot(index: SlotIndex, slot: &'a Slot) -> Self {
        let segment = Self { index, slot };
        debug_assert!(
            // SAFETY: we are the owner per the caller's contract.
            matches!(unsafe { slot.body() }, SlotBody::Segment(_)),
            "{index:?} does not hold a segment"
        );
        segment
    }

    fn body(&self) -> &SegmentBody {
        // SAFETY: `self` is the unique owner token of this slot.
        match unsafe { self.slot.body() } {
            SlotBody::Segment(body) => body,
            SlotBody::Magazine(_) => unreachable!("segment token over a magazine slot"),
        }
    }

    fn body_mut(&mut self) -> &mut SegmentBody {
        // SAFETY: `self` is the unique owner token and `&mut self` rules out
        // any other live body reference.
        match unsafe { self.slot.body_mut() } {
            SlotBody::Segment(body) => body,
            SlotBody::Magazine(_) => unreachable!("segment token over a magazine slot"),
        }
    }

    /// Push an entry. Returns `false` without modifying anything if full.
    #[inline]
    pub fn push(&mut self, entry: WorkEntry) -> bool {
        let body = self.body_mut();
        let len = body.len as usize;
        if len == SEGMENT_CAPACITY {
            return false;
        }
        body.entries[len] = entry;
        body.len += 1;
        true
    }

    /// Pop the most recently pushed entry.
    #[inline]
    pub fn pop(&mut self) -> Option<WorkEntry> {
        let body = self.body_mut();
        if body.len == 0 {
            return None;
        }
        body.len -= 1;
        Some(body.entries[body.len as usize])
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body().len as usize
    }

    /// Whether the segment holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body().len == 0
    }

    /// Whether another push would fail.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == SEGMENT_CAPACITY
    }

    /// The arena slot backing this segment.
    #[must_use]
    pub const fn index(&self) -> SlotIndex {
        self.index
    }

    /// Reuse this segment's slot as an empty magazine.
    pub(crate) fn into_magazine(self) -> Magazine<'a> {
        debug_assert!(self.is_empty(), "converting a non-empty segment");
        // SAFETY: `self` is consumed, so no segment body reference survives.
        unsafe {
            *self.slot.body_mut() = SlotBody::Magazine(MagazineBody::new());
        }
        Magazine {
            index: self.index,
            slot: self.slot,
        }
    }
}

impl<'a> ListNode<'a> for Segment<'a> {
    fn slot(&self) -> &'a Slot {
        self.slot
    }

    fn into_index(self) -> SlotIndex {
        self.index
    }

    unsafe fn from_index(arena: &'a Arena, index: SlotIndex) -> Self {
        // SAFETY: forwarded from the caller.
        unsafe { Self::from_slot(index, arena.slot(index)) }
    }
}

impl fmt::Debug for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("index", &self.index)
            .field("len", &self.len())
            .finish()
    }
}

/// A batch of empty segments, stored in a slot of its own.
pub struct Magazine<'a> {
    index: SlotIndex,
    slot: &'a Slot,
}

impl<'a> Magazine<'a> {
    /// # Safety
    ///
    /// The slot must hold a magazine body and the caller must be its only owner.
    pub(crate) unsafe fn from_slot(index: SlotIndex, slot: &'a Slot) -> Self {
        debug_assert!(
            // SAFETY: we are the owner per the caller's contract.
            matches!(unsafe { slot.body() }, SlotBody::Magazine(_)),
            "{index:?} does not hold a magazine"
        );
        Self { index, slot }
    }

    fn body(&self) -> &MagazineBody {
        // SAFETY: `self` is the unique owner token of this slot.
        match unsafe { self.slot.body() } {
            SlotBody::Magazine(body) => body,
            SlotBody::Segment(_) => unreachable!("magazine token over a segment slot"),
        }
    }

    fn body_mut(&mut self) -> &mut MagazineBody {
        // SAFETY: unique owner plus `&mut self`.
        match unsafe { self.slot.body_mut() } {
            SlotBody::Magazine(body) => body,
            SlotBody::Segment(_) => unreachable!("magazine token over a segment slot"),
        }
    }

    /// Store an empty segment. Hands it back if the magazine is full.
    pub fn push(&mut self, segment: Segment<'a>) -> Result<(), Segment<'a>> {
        debug_assert!(segment.is_empty(), "magazines only hold empty segments");
        let body = self.body_mut();
        let len = body.len as usize;
        if len == MAGAZINE_CAPACITY {
            return Err(segment);
        }
        body.segments[len] = segment.index;
        body.len += 1;
        Ok(())
    }

    /// Take an empty segment out of the magazine.
    pub fn pop(&mut self, arena: &'a Arena) -> Option<Segment<'a>> {
        let body = self.body_mut();
        if body.len == 0 {
            return None;
        }
        body.len -= 1;
        let index = body.segments[body.len as usize];
        // SAFETY: indices stored in a magazine refer to initialised segment
        // slots, and removing it from the body makes us the only owner.
        Some(unsafe { Segment::from_slot(index, arena.slot(index)) })
    }

    /// Number of segments held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body().len as usize
    }

    /// Whether the magazine holds no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body().len == 0
    }

    /// Whether the magazine is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == MAGAZINE_CAPACITY
    }

    /// The arena slot backing this magazine.
    #[must_use]
    pub const fn index(&self) -> SlotIndex {
        self.index
    }

    /// Reuse this (empty) magazine's slot as an empty segment.
    pub(crate) fn into_segment(self) -> Segment<'a> {
        debug_assert!(self.is_empty(), "converting a non-empty magazine");
        // SAFETY: `self` is consumed, so no magazine body reference survives.
        unsafe {
            *self.slot.body_mut() = SlotBody::Segment(SegmentBody::new());
        }
        Segment {
            index: self.index,
            slot: self.slot,
        }
    }
}

impl<'a> ListNode<'a> for Magazine<'a> {
    fn slot(&self) -> &'a Slot {
        self.slot
    }

    fn into_index(self) -> SlotIndex {
        self.index
    }

    unsafe fn from_index(arena: &'a Arena, index: SlotIndex) -> Self {
        // SAFETY: forwarded from the caller.
        unsafe { Self::from_slot(index, arena.slot(index)) }
    }
}

impl fmt::Debug for Magazine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Magazine")
            .field("index", &self.index)
            .field("len", &self.len())
            .finish()
    }
}
