//! # Virtual Memory Interfaces
//!
//! The page allocator's view of virtual memory. The page-table walker itself
//! lives elsewhere; this crate only pins down the vocabulary the allocator and
//! its copy-on-write helpers speak:
//!
//! - [`PhysAddr`]/[`VirtAddr`] newtypes (u64) to avoid mixing address kinds.
//! - [`PageEntryBits`], an x86-64 leaf entry with a software COW bit.
//! - [`PageTableOps`], the map/walk/unmap operations of one address space.
//! - [`PhysMapper`], turning a physical address into a usable pointer.
//!
//! ## Copy-on-write in page table terms
//!
//! ```text
//!  parent PTE: P=1 RW=1 COW=0 ──┐            parent PTE: P=1 RW=0 COW=1 ──┐
//!                               ├─► page  ⇒                               ├─► page (count 2)
//!                               │             child PTE:  P=1 RW=0 COW=1 ──┘
//! ```
//!
//! A write through either entry faults. The fault handler asks the page
//! allocator for the page's reference count and either copies the page or
//! restores `RW=1` in place.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod addresses;
mod page_entry_bits;

pub use crate::addresses::{PhysAddr, VirtAddr};
pub use crate::page_entry_bits::PageEntryBits;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Failure reported by a page table implementation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("virtual address {0} is already mapped")]
    AlreadyMapped(VirtAddr),
    #[error("virtual address {0} is not page aligned")]
    Unaligned(VirtAddr),
    #[error("out of memory for intermediate page tables")]
    OutOfMemory,
}

/// Operations on one address space, provided by the virtual memory layer.
///
/// Only 4 KiB leaves are involved in copy-on-write.
pub trait PageTableOps {
    /// Map `[va, va + size)` to `[pa, pa + size)` with `flags` (the physical
    /// address bits of `flags` are ignored).
    ///
    /// # Errors
    /// The range is already mapped, unaligned, or intermediate tables could
    /// not be allocated.
    fn map_page(
        &mut self,
        va: VirtAddr,
        size: u64,
        pa: PhysAddr,
        flags: PageEntryBits,
    ) -> Result<(), MapError>;

    /// The leaf entry for `va`, optionally creating intermediate tables.
    ///
    /// `None` if no table covers `va` (and `create` is `false`, or creating
    /// one failed). A returned entry may still be non-present.
    fn walk(&mut self, va: VirtAddr, create: bool) -> Option<&mut PageEntryBits>;

    /// Clear `pages` leaves starting at `va`. With `free_underlying`, the
    /// implementation also returns the mapped frames to its allocator.
    fn unmap_range(&mut self, va: VirtAddr, pages: u64, free_underlying: bool);
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (e.g., via identity map or a higher-half direct map, HHDM).
///
/// Typical patterns:
/// - **Kernel**: uses HHDM; adds a constant offset before returning a pointer.
/// - **Tests**: index into a host-allocated RAM arena.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped and writable in the current address space.
    /// - Type `T` must match the bytes at `pa`, and no other reference to
    ///   them may be live for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T;
}
