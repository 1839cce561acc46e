//! Virtual memory primitives for growable arenas.
//!
//! A [`Reservation`] claims a contiguous range of address space without
//! backing it with physical memory. Sub-ranges are then committed (made
//! readable and writable) and decommitted (returned to the OS while the
//! address range stays reserved) on page granularity.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is typically the system page size.
/// Reservations are rounded up to this granularity.
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// A reserved, initially inaccessible range of address space.
///
/// The whole range is released when the reservation is dropped.
pub struct Reservation {
    inner: os::ReservationInner,
}

impl Reservation {
    /// Reserves `len` bytes of address space, rounded up to
    /// [`allocation_granularity`].
    ///
    /// No physical memory is committed; touching the range before a
    /// successful [`commit`](Self::commit) faults.
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is zero or the OS refuses the reservation.
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "reservation length must be greater than 0",
            ));
        }
        let len = align_up(len, allocation_granularity());
        // SAFETY: reserving fresh address space has no preconditions; the
        // returned range is not aliased by anything else in the process.
        let inner = unsafe { os::ReservationInner::reserve(len)? };
        Ok(Self { inner })
    }

    /// Returns a pointer to the start of the reserved range.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the reserved range in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Always `false`: zero-length reservations are rejected by [`Reservation::new`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Commits `[offset, offset + len)` as readable and writable memory.
    ///
    /// Freshly committed pages read as zero. Committing an already
    /// committed range is allowed and leaves its contents untouched on Unix
    /// and Windows.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds, not page aligned, or
    /// the OS fails to back it.
    pub fn commit(&self, offset: usize, len: usize) -> io::Result<()> {
        self.check_range(offset, len)?;
        if len == 0 {
            return Ok(());
        }
        // SAFETY: the range lies inside our reservation; committing does not
        // invalidate any existing contents.
        unsafe { self.inner.commit(offset, len) }
    }

    /// Decommits `[offset, offset + len)`, returning its pages to the OS.
    ///
    /// The range stays reserved and may be committed again later; its
    /// previous contents are lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds, not page aligned, or
    /// the OS call fails.
    ///
    /// # Safety
    ///
    /// No live reference may point into the decommitted range.
    pub unsafe fn decommit(&self, offset: usize, len: usize) -> io::Result<()> {
        self.check_range(offset, len)?;
        if len == 0 {
            return Ok(());
        }
        // SAFETY: caller guarantees nothing references the range.
        unsafe { self.inner.decommit(offset, len) }
    }

    fn check_range(&self, offset: usize, len: usize) -> io::Result<()> {
        let page = page_size();
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len());
        if !in_bounds {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "range {offset:#x}+{len:#x} exceeds reservation of {:#x} bytes",
                    self.len()
                ),
            ));
        }
        if offset % page != 0 || len % page != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range {offset:#x}+{len:#x} is not aligned to page size {page:#x}"),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("ptr", &self.ptr())
            .field("len", &self.len())
            .finish()
    }
}

// SAFETY: a reservation is a plain address range; the OS calls it wraps are
// thread-safe and the type hands out no references by itself.
unsafe impl Send for Reservation {}
// SAFETY: see Send impl
unsafe impl Sync for Reservation {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_page_size() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "Page size should be power of 2");
    }

    #[test]
    fn test_allocation_granularity() {
        let ag = allocation_granularity();
        assert!(ag > 0);
        assert_eq!(ag & (ag - 1), 0, "Allocation granularity should be power of 2");
        assert!(ag >= page_size());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = Reservation::new(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_reserve_rounds_up() {
        let reservation = Reservation::new(1).expect("failed to reserve");
        assert_eq!(reservation.len(), allocation_granularity());
        assert!(!reservation.ptr().is_null());
    }

    #[test]
    fn test_commit_then_write() {
        let page = page_size();
        let reservation = Reservation::new(page * 8).expect("failed to reserve");
        reservation.commit(page, page * 2).expect("failed to commit");

        let ptr = unsafe { reservation.ptr().add(page) };
        unsafe {
            assert_eq!(ptr::read_volatile(ptr), 0, "fresh pages must read as zero");
            ptr::write_volatile(ptr, 42);
            assert_eq!(ptr::read_volatile(ptr), 42);
            ptr::write_volatile(ptr.add(page * 2 - 1), 7);
        }
    }

    #[test]
    fn test_decommit_and_recommit() {
        let page = page_size();
        let reservation = Reservation::new(page * 4).expect("failed to reserve");
        reservation.commit(0, page * 4).expect("failed to commit");
        unsafe {
            ptr::write_volatile(reservation.ptr(), 99);
            reservation.decommit(0, page * 4).expect("failed to decommit");
        }
        reservation.commit(0, page).expect("failed to recommit");
        unsafe {
            assert_eq!(ptr::read_volatile(reservation.ptr()), 0);
        }
    }

    #[test]
    fn test_out_of_bounds_commit() {
        let page = page_size();
        let reservation = Reservation::new(page).expect("failed to reserve");
        let len = reservation.len();
        let err = reservation.commit(len, page).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err = reservation.commit(usize::MAX - 1, page).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_unaligned_commit() {
        let page = page_size();
        let reservation = Reservation::new(page * 2).expect("failed to reserve");
        let err = reservation.commit(1, page).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
