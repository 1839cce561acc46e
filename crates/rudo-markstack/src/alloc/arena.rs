//! Growable bump allocator over one reserved address range.
//!
//! The whole hard limit is reserved up front; physical memory is committed
//! one expansion chunk at a time as the bump pointer crosses the committed
//! end. The common allocation path is a single CAS on `top`. Only a thread
//! that finds the committed space exhausted takes the expand lock, and only
//! to commit more memory.

use parking_lot::{Mutex, MutexGuard};
use sys_alloc::{align_up, page_size, Reservation};

use crate::config::MarkStackConfig;
use crate::error::{ConfigError, MarkStackError};
use crate::stack::segment::{Slot, SlotIndex, SLOT_ALIGN};
use crate::sync::atomic::{AtomicUsize, Ordering};

/// Bump allocator backing every mark stack slot of one collector instance.
pub struct Arena {
    reservation: Reservation,
    /// Bytes handed out so far.
    top: AtomicUsize,
    /// Bytes committed so far. Only grows while `expand_lock` is held.
    end: AtomicUsize,
    limit: usize,
    expand_chunk: usize,
    expand_lock: Mutex<()>,
    expansions: AtomicUsize,
}

impl Arena {
    /// Reserve `limit` bytes, committing `expand_chunk` bytes per expansion.
    ///
    /// Both values are rounded up to the page size. The usable limit never
    /// exceeds what a [`SlotIndex`] can address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ArenaTooLarge`] if `limit` is beyond
    /// [`MarkStackConfig::max_arena_limit`], and [`MarkStackError::Reserve`]
    /// if the address range cannot be reserved.
    pub fn new(limit: usize, expand_chunk: usize) -> Result<Self, MarkStackError> {
        let maximum = MarkStackConfig::max_arena_limit();
        if limit > maximum {
            return Err(ConfigError::ArenaTooLarge { limit, maximum }.into());
        }
        let page = page_size();
        let reserved = align_up(limit.max(1), page);
        let limit = reserved.min(maximum);
        let expand_chunk = align_up(expand_chunk.max(1), page);
        let reservation = Reservation::new(reserved).map_err(MarkStackError::Reserve)?;
        debug_assert_eq!(reservation.ptr() as usize % SLOT_ALIGN, 0);
        Ok(Self {
            reservation,
            top: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            limit,
            expand_chunk,
            expand_lock: Mutex::new(()),
            expansions: AtomicUsize::new(0),
        })
    }

    /// Allocate `size` bytes, returning the offset of the block.
    ///
    /// `size` is rounded up to the slot alignment. The returned range is
    /// committed and never overlaps a range returned to another caller
    /// before the next [`shrink`](Self::shrink).
    ///
    /// # Errors
    ///
    /// [`MarkStackError::ArenaExhausted`] if the hard limit would be
    /// exceeded, which must abort the marking cycle, or
    /// [`MarkStackError::Commit`] if the OS refuses to back the memory.
    pub fn alloc(&self, size: usize) -> Result<usize, MarkStackError> {
        let size = align_up(size, SLOT_ALIGN);
        if let Some(offset) = self.try_alloc(size) {
            return Ok(offset);
        }
        self.expand_and_alloc(size)
    }

    /// Lock-free bump within the committed range.
    fn try_alloc(&self, size: usize) -> Option<usize> {
        let mut top = self.top.load(Ordering::Relaxed);
        loop {
            let end = self.end.load(Ordering::Acquire);
            let new_top = top.checked_add(size)?;
            if new_top > end {
                return None;
            }
            match self
                .top
                .compare_exchange_weak(top, new_top, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Some(top),
                Err(current) => top = current,
            }
        }
    }

    #[cold]
    fn expand_and_alloc(&self, size: usize) -> Result<usize, MarkStackError> {
        let guard = self.expand_lock.lock();
        loop {
            // Another thread may have expanded while we waited for the lock.
            if let Some(offset) = self.try_alloc(size) {
                return Ok(offset);
            }
            if !self.expand(&guard)? {
                let used = self.top.load(Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                crate::tracing::log_arena_exhausted(size, used, self.limit);
                return Err(MarkStackError::ArenaExhausted {
                    requested: size,
                    used,
                    limit: self.limit,
                });
            }
        }
    }

    /// Commit one more chunk. Returns `false` once the limit is reached.
    ///
    /// Taking the guard proves the caller holds the expand lock.
    fn expand(&self, _guard: &MutexGuard<'_, ()>) -> Result<bool, MarkStackError> {
        let end = self.end.load(Ordering::Relaxed);
        if end >= self.limit {
            return Ok(false);
        }
        let chunk = self.expand_chunk.min(self.limit - end);
        self.reservation
            .commit(end, chunk)
            .map_err(MarkStackError::Commit)?;
        self.end.store(end + chunk, Ordering::Release);
        self.expansions.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "tracing")]
        crate::tracing::log_arena_expand(end + chunk, self.limit);
        Ok(true)
    }

    /// Release memory beyond current usage and reset the bump pointer.
    ///
    /// Called at cycle end. Usage is rounded up to the expansion chunk so a
    /// cycle of similar size does not have to expand again. `&mut self`
    /// guarantees that no slot reference outlives the reset.
    ///
    /// # Errors
    ///
    /// [`MarkStackError::Decommit`] if the OS call fails; the arena is still
    /// reset in that case.
    pub fn shrink(&mut self) -> Result<(), MarkStackError> {
        let used = self.top.load(Ordering::Relaxed);
        let end = self.end.load(Ordering::Relaxed);
        let keep = (used.div_ceil(self.expand_chunk) * self.expand_chunk).min(end);
        self.top.store(0, Ordering::Relaxed);
        if keep < end {
            self.end.store(keep, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            crate::tracing::log_arena_shrink(used, keep, end);
            // SAFETY: `&mut self` means no slot reference into the arena is live.
            unsafe { self.reservation.decommit(keep, end - keep) }
                .map_err(MarkStackError::Decommit)?;
        }
        Ok(())
    }

    /// Resolve a slot index to the slot it names.
    ///
    /// Indices are only minted by the allocator after the slot is
    /// initialised, and are never dereferenced past [`shrink`](Self::shrink)
    /// because every holder borrows the arena.
    pub(crate) fn slot(&self, index: SlotIndex) -> &Slot {
        debug_assert!(
            index.offset() < self.end.load(Ordering::Relaxed),
            "{index:?} is outside the committed arena"
        );
        // SAFETY: see above; the offset lies in committed memory holding an
        // initialised `Slot`.
        unsafe { &*self.reservation.ptr().add(index.offset()).cast::<Slot>() }
    }

    /// Raw pointer to the byte at `offset`, for initialising fresh slots.
    pub(crate) fn slot_ptr(&self, offset: usize) -> *mut Slot {
        debug_assert!(offset < self.end.load(Ordering::Relaxed));
        debug_assert_eq!(offset % SLOT_ALIGN, 0);
        // SAFETY: `offset` lies within the reservation.
        unsafe { self.reservation.ptr().add(offset).cast::<Slot>() }
    }

    /// Bytes handed out since the last shrink.
    #[must_use]
    pub fn used(&self) -> usize {
        self.top.load(Ordering::Relaxed)
    }

    /// Bytes currently committed.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.end.load(Ordering::Acquire)
    }

    /// Hard limit in bytes.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes committed per expansion.
    #[must_use]
    pub const fn expand_chunk(&self) -> usize {
        self.expand_chunk
    }

    /// Number of expansions performed over the arena's lifetime.
    #[must_use]
    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("used", &self.used())
            .field("committed", &self.committed())
            .field("limit", &self.limit)
            .field("expand_chunk", &self.expand_chunk)
            .finish_non_exhaustive()
    }
}
