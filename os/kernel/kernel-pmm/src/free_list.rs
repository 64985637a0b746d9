use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};

/// End-of-list marker.
pub(crate) const NIL: u32 = u32::MAX;

/// Next-links of every managed page, indexed by page number.
///
/// A page's link is only read or written by whoever holds the lock of the
/// [`FreeList`] the page currently sits on, so `Relaxed` suffices; the pool
/// lock orders the accesses.
pub(crate) struct Links(Box<[AtomicU32]>);

impl Links {
    pub(crate) fn new(pages: usize) -> Self {
        Self((0..pages).map(|_| AtomicU32::new(NIL)).collect())
    }

    #[inline]
    fn next(&self, page: u32) -> u32 {
        self.0[page as usize].load(Ordering::Relaxed)
    }

    #[inline]
    fn set_next(&self, page: u32, next: u32) {
        self.0[page as usize].store(next, Ordering::Relaxed);
    }
}

/// A LIFO stack of free pages threaded through [`Links`].
///
/// # Invariants
/// - Every page on the list is on no other list.
/// - `len` equals the number of pages reachable from `head`.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: u32,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: NIL, len: 0 }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push(&mut self, links: &Links, page: u32) {
        debug_assert_ne!(page, NIL);
        links.set_next(page, self.head);
        self.head = page;
        self.len += 1;
    }

    pub(crate) fn pop(&mut self, links: &Links) -> Option<u32> {
        if self.head == NIL {
            return None;
        }
        let page = self.head;
        self.head = links.next(page);
        links.set_next(page, NIL);
        self.len -= 1;
        Some(page)
    }
}
