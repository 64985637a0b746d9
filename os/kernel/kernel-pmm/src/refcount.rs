//! Copy-on-write reference counts.
//!
//! A flat table indexed by page number, one count per managed page. Kept
//! outside the pages themselves because free pages are junk-filled and cannot
//! carry metadata. Every read and write goes through the table lock: counts are
//! changed by fault handlers running on other cores.

use alloc::boxed::Box;
use alloc::vec;
use kernel_info::memory::PAGE_SIZE;
use kernel_sync::SpinLock;
use kernel_vmem::PhysAddr;

/// Per-page count of copy-on-write page table entries.
pub struct RefCountTable {
    start: PhysAddr,
    pages: usize,
    counts: SpinLock<Box<[u16]>>,
}

impl RefCountTable {
    /// A zeroed table covering `pages` pages starting at `start`.
    #[must_use]
    pub fn new(start: PhysAddr, pages: usize) -> Self {
        Self {
            start,
            pages,
            counts: SpinLock::new("cow refcount", vec![0; pages].into_boxed_slice()),
        }
    }

    /// Number of COW entries currently pointing at `page`.
    ///
    /// # Panics
    /// If `page` is not a managed page.
    #[must_use]
    pub fn get(&self, page: PhysAddr) -> u16 {
        let idx = self.index(page);
        self.counts.lock()[idx]
    }

    /// Record one more COW entry for `page`; returns the new count.
    ///
    /// # Panics
    /// If `page` is not a managed page or the count would overflow.
    pub fn increment(&self, page: PhysAddr) -> u16 {
        let idx = self.index(page);
        let mut counts = self.counts.lock();
        let Some(n) = counts[idx].checked_add(1) else {
            panic!("refcount: overflow on {page}");
        };
        counts[idx] = n;
        n
    }

    /// Drop one COW entry for `page`; returns the remaining count.
    ///
    /// # Panics
    /// If `page` is not a managed page or its count is already zero.
    pub fn decrement(&self, page: PhysAddr) -> u16 {
        let idx = self.index(page);
        let mut counts = self.counts.lock();
        let Some(n) = counts[idx].checked_sub(1) else {
            panic!("refcount: decrement below zero on {page}");
        };
        counts[idx] = n;
        n
    }

    fn index(&self, page: PhysAddr) -> usize {
        let off = page
            .as_u64()
            .checked_sub(self.start.as_u64())
            .unwrap_or_else(|| panic!("refcount: {page} below managed range"));
        let idx = usize::try_from(off / PAGE_SIZE).unwrap_or(usize::MAX);
        assert!(idx < self.pages, "refcount: {page} above managed range");
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: PhysAddr = PhysAddr::new(0x10_0000);

    #[test]
    fn counts_start_at_zero_and_track_changes() {
        let t = RefCountTable::new(START, 4);
        let p = START.add_pages(2);
        assert_eq!(t.get(p), 0);
        assert_eq!(t.increment(p), 1);
        assert_eq!(t.increment(p), 2);
        assert_eq!(t.decrement(p), 1);
        assert_eq!(t.get(p), 1);
        assert_eq!(t.get(START), 0);
    }

    #[test]
    fn unaligned_addresses_index_their_page() {
        let t = RefCountTable::new(START, 2);
        t.increment(START.add_pages(1));
        assert_eq!(t.get(PhysAddr::new(START.add_pages(1).as_u64() + 123)), 1);
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn underflow_is_fatal() {
        let t = RefCountTable::new(START, 1);
        t.decrement(START);
    }

    #[test]
    #[should_panic(expected = "above managed range")]
    fn out_of_range_is_fatal() {
        let t = RefCountTable::new(START, 1);
        let _ = t.get(START.add_pages(1));
    }
}
