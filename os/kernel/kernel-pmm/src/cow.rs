//! Copy-on-write fork and fault resolution.
//!
//! The page allocator only counts references; these helpers drive the counts
//! the way the fork path and the page fault handler need them:
//!
//! | Event | Count change |
//! |-------|--------------|
//! | writable page shared by [`share_range`] | +2 (parent and child entry) |
//! | COW page shared again by [`share_range`] | +1 (child entry) |
//! | write fault, count 1 ([`handle_write_fault`]) | -1, entry made writable in place |
//! | write fault, count > 1 | -1, entry moved to a private copy |
//! | COW entry torn down ([`unmap_shared`]) | -1 |
//!
//! Whoever drops a count to zero frees the page. A fault copies the page
//! before dropping its reference, so a concurrent fault on the other mapping
//! never sees the page freed under it.

use crate::{CowError, CpuId, PageAllocator};
use kernel_info::memory::PAGE_SIZE;
use kernel_vmem::{PageTableOps, PhysAddr, PhysMapper, VirtAddr};
use log::trace;

/// How a write fault on a COW mapping was resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultResolution {
    /// The faulting entry held the last reference and became writable in place.
    Upgraded,
    /// The page was copied; the entry now maps this private page.
    Copied(PhysAddr),
}

/// Share `[va, va + len)` of `parent` with `child` (the `fork` path).
///
/// Writable and COW pages are shared copy-on-write. Read-only pages are
/// copied into a fresh page that `child` maps read-only, since only COW
/// entries are reference counted.
///
/// On error the pages handled so far stay shared; the caller tears `child`
/// down with [`unmap_shared`].
///
/// # Errors
/// - [`CowError::NotMapped`] if a page in the range is not present in `parent`.
/// - [`CowError::Unmanaged`] if a shared page is not an allocator page.
/// - [`CowError::MappingFailed`] if `child` refuses a mapping.
/// - [`CowError::OutOfMemory`] if copying a read-only page fails.
pub fn share_range<M, P, C>(
    pmm: &PageAllocator<M>,
    parent: &mut P,
    child: &mut C,
    va: VirtAddr,
    len: u64,
    cpu: CpuId,
) -> Result<(), CowError>
where
    M: PhysMapper,
    P: PageTableOps + ?Sized,
    C: PageTableOps + ?Sized,
{
    let first = va.page_round_down();
    let pages = VirtAddr::new(va.as_u64() + len)
        .page_round_up()
        .as_u64()
        .saturating_sub(first.as_u64())
        / PAGE_SIZE;

    for n in 0..pages {
        let page_va = first.add_pages(n);
        let Some(entry) = parent.walk(page_va, false).filter(|e| e.present()) else {
            return Err(CowError::NotMapped(page_va));
        };

        if entry.is_cow_candidate() {
            let already_shared = entry.copy_on_write();
            let pa = pmm.mark_copy_on_write(entry, child, page_va)?;
            pmm.references().increment(pa);
            if !already_shared {
                pmm.references().increment(pa);
            }
        } else {
            let src = entry.physical_address();
            let flags = *entry;
            let copy = pmm.allocate(cpu)?;
            pmm.copy_page(copy, src);
            if let Err(e) = child.map_page(page_va, PAGE_SIZE, copy, flags) {
                pmm.free(copy, cpu);
                return Err(e.into());
            }
        }
    }

    trace!("cow: shared {pages} pages at {first}");
    Ok(())
}

/// Resolve a write fault at `va` on a copy-on-write mapping in `pt`.
///
/// # Errors
/// - [`CowError::NotMapped`] if nothing is mapped at `va`.
/// - [`CowError::NotCopyOnWrite`] if the mapping is not COW; the fault is a
///   genuine protection violation.
/// - [`CowError::Unmanaged`] if the entry points outside the allocator.
/// - [`CowError::OutOfMemory`] if no page is left for the copy. The mapping
///   and its reference are left untouched.
pub fn handle_write_fault<M, P>(
    pmm: &PageAllocator<M>,
    pt: &mut P,
    va: VirtAddr,
    cpu: CpuId,
) -> Result<FaultResolution, CowError>
where
    M: PhysMapper,
    P: PageTableOps + ?Sized,
{
    let va = va.page_round_down();
    let Some(entry) = pt.walk(va, false).filter(|e| e.present()) else {
        return Err(CowError::NotMapped(va));
    };
    if !entry.copy_on_write() {
        return Err(CowError::NotCopyOnWrite(va));
    }
    let pa = entry.physical_address();
    if !pmm.manages(pa) {
        return Err(CowError::Unmanaged(pa));
    }

    let refs = pmm.references();
    if refs.get(pa) == 1 {
        *entry = entry.into_private_writable();
        let left = refs.decrement(pa);
        debug_assert_eq!(left, 0);
        trace!("cow: {va} upgraded in place");
        return Ok(FaultResolution::Upgraded);
    }

    let copy = pmm.allocate(cpu)?;
    pmm.copy_page(copy, pa);
    *entry = entry.into_private_writable().with_physical_address(copy);
    if refs.decrement(pa) == 0 {
        // The other holder copied concurrently; nobody maps the original now.
        pmm.free(pa, cpu);
    }
    trace!("cow: {va} copied {pa} -> {copy}");
    Ok(FaultResolution::Copied(copy))
}

/// Unmap `pages` pages at `va` from `pt`, releasing what the mappings owned.
///
/// A COW entry drops its reference and the page is freed with the last one.
/// A private allocator page is freed directly. Pages outside the allocator
/// and holes in the range are skipped.
pub fn unmap_shared<M, P>(pmm: &PageAllocator<M>, pt: &mut P, va: VirtAddr, pages: u64, cpu: CpuId)
where
    M: PhysMapper,
    P: PageTableOps + ?Sized,
{
    let first = va.page_round_down();
    for n in 0..pages {
        let page_va = first.add_pages(n);
        let Some(entry) = pt.walk(page_va, false).filter(|e| e.present()).copied() else {
            continue;
        };
        pt.unmap_range(page_va, 1, false);

        let pa = entry.physical_address();
        if !pmm.manages(pa) {
            continue;
        }
        if entry.copy_on_write() {
            if pmm.references().decrement(pa) == 0 {
                pmm.free(pa, cpu);
            }
        } else {
            pmm.free(pa, cpu);
        }
    }
}
