//! Per-CPU physical page allocator.
//!
//! Every CPU owns a free list behind its own lock. `allocate` serves from the
//! caller's list and only touches peers when that list runs dry; `free` always
//! returns the page to the caller's list, so a page is next served by the CPU
//! that last released it.

use crate::free_list::{FreeList, Links};
use crate::refcount::RefCountTable;
use crate::{CpuId, PAGE_BYTES, PmmConfig};
use alloc::boxed::Box;
use kernel_info::memory::{ALLOC_FILL, FREE_FILL, PAGE_SIZE};
use kernel_sync::SpinLock;
use kernel_vmem::{PageEntryBits, PageTableOps, PhysAddr, PhysMapper, VirtAddr};
use log::{debug, trace, warn};

/// A CPU's free pages, padded to a cache line so neighboring pools don't false-share.
#[repr(align(64))]
struct CorePool {
    free: SpinLock<FreeList>,
}

/// Physical page allocator with per-CPU pools and copy-on-write reference counts.
pub struct PageAllocator<M: PhysMapper> {
    mapper: M,
    /// First managed page.
    start: PhysAddr,
    /// Number of managed pages.
    pages: usize,
    links: Links,
    pools: Box<[CorePool]>,
    refs: RefCountTable,
    config: PmmConfig,
}

impl<M: PhysMapper> PageAllocator<M> {
    /// Manage the pages inside `[start, end)`.
    ///
    /// The range is shrunk to whole pages and split evenly between the
    /// configured CPUs; the last CPU also takes the remainder. Every page is
    /// junk-filled as it enters a pool.
    ///
    /// # Safety
    /// - Every page in the range must be mapped through `mapper`, writable,
    ///   and exclusively owned by the allocator from now on.
    ///
    /// # Panics
    /// If the configuration has no CPUs or no stealing budget, or the range
    /// holds more pages than the index type can address.
    pub unsafe fn new(mapper: M, start: PhysAddr, end: PhysAddr, config: PmmConfig) -> Self {
        config.validate();
        let first = start.page_round_up();
        let last = end.page_round_down();
        let pages = last
            .as_u64()
            .saturating_sub(first.as_u64())
            .checked_div(PAGE_SIZE)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        assert!(
            u32::try_from(pages).is_ok_and(|n| n < crate::free_list::NIL),
            "pmm: {pages} pages exceed the page index range"
        );

        let pools = (0..config.cpus)
            .map(|_| CorePool {
                free: SpinLock::new("kmem", FreeList::new()),
            })
            .collect();

        let this = Self {
            mapper,
            start: first,
            pages,
            links: Links::new(pages),
            pools,
            refs: RefCountTable::new(first, pages),
            config,
        };

        let per_cpu = pages / config.cpus;
        for cpu in 0..config.cpus {
            let lo = cpu * per_cpu;
            let hi = if cpu == config.cpus - 1 {
                pages
            } else {
                lo + per_cpu
            };
            // Push in reverse so each pool hands out ascending addresses.
            for idx in (lo..hi).rev() {
                this.release_to(CpuId::new(cpu), idx);
            }
        }

        debug!(
            "pmm: managing {pages} pages [{first}, {last}) across {} cpus",
            config.cpus
        );
        this
    }

    /// Take one page, preferring `cpu`'s pool.
    ///
    /// When the local pool is empty, pages are stolen one at a time from the
    /// other pools into the local one, for at most `steal_rounds` passes of
    /// `steal_batch` pages. The returned page is filled with
    /// [`ALLOC_FILL`].
    ///
    /// # Errors
    /// [`PmmError::OutOfMemory`] if no pool has a page left.
    ///
    /// # Panics
    /// If `cpu` is not a configured CPU.
    pub fn allocate(&self, cpu: CpuId) -> Result<PhysAddr, PmmError> {
        let own = self.pool(cpu);
        for _ in 0..self.config.steal_rounds {
            if let Some(idx) = own.free.lock().pop(&self.links) {
                return Ok(self.hand_out(idx));
            }
            if self.steal(cpu) == 0 {
                break;
            }
        }
        // Pages stolen in the last pass may still be waiting.
        if let Some(idx) = own.free.lock().pop(&self.links) {
            return Ok(self.hand_out(idx));
        }
        warn!("pmm: out of memory on cpu {}", cpu.as_usize());
        Err(PmmError::OutOfMemory)
    }

    /// Return `page` to `cpu`'s pool, junk-filled with [`FREE_FILL`].
    ///
    /// # Panics
    /// If `page` is not page aligned, lies outside the managed range, or is
    /// still referenced by copy-on-write mappings. These are kernel bugs.
    pub fn free(&self, page: PhysAddr, cpu: CpuId) {
        assert!(page.is_page_aligned(), "free: {page} is not page aligned");
        let Some(idx) = self.index_of(page) else {
            panic!("free: {page} is outside the managed range");
        };
        let refs = self.refs.get(page);
        assert!(
            refs == 0,
            "free: {page} still has {refs} copy-on-write references"
        );
        self.release_to(cpu, idx);
    }

    /// Share the page behind `parent` with `child` at `va`, copy-on-write.
    ///
    /// Maps the same physical page into `child` read-only with the COW flag
    /// and downgrades `parent` to the same flags. Reference counts are left to
    /// the caller: one [`RefCountTable::increment`] per COW entry created.
    ///
    /// # Errors
    /// - [`CowError::NotMapped`] if `parent` is not present.
    /// - [`CowError::ReadOnly`] if `parent` is neither writable nor COW.
    /// - [`CowError::Unmanaged`] if the page is not one of ours.
    /// - [`CowError::MappingFailed`] if `child` refuses the mapping; `parent`
    ///   is left untouched in that case.
    pub fn mark_copy_on_write<P: PageTableOps + ?Sized>(
        &self,
        parent: &mut PageEntryBits,
        child: &mut P,
        va: VirtAddr,
    ) -> Result<PhysAddr, CowError> {
        if !parent.present() {
            return Err(CowError::NotMapped(va));
        }
        if !parent.is_cow_candidate() {
            return Err(CowError::ReadOnly(va));
        }
        let pa = parent.physical_address();
        if self.index_of(pa).is_none() {
            return Err(CowError::Unmanaged(pa));
        }

        let shared = parent.into_copy_on_write();
        child.map_page(va, PAGE_SIZE, pa, shared)?;
        *parent = shared;
        trace!("pmm: {va} -> {pa} shared copy-on-write");
        Ok(pa)
    }

    /// COW reference count of `page`, read under the table lock.
    ///
    /// # Panics
    /// If `page` is not a managed page.
    #[must_use]
    pub fn reference_count(&self, page: PhysAddr) -> u16 {
        self.refs.get(page)
    }

    /// The reference-count table, for the fault handler's increments and decrements.
    #[must_use]
    pub const fn references(&self) -> &RefCountTable {
        &self.refs
    }

    /// Copy the contents of `src` into `dst`.
    ///
    /// # Panics
    /// If either page is outside the managed range.
    pub fn copy_page(&self, dst: PhysAddr, src: PhysAddr) {
        assert!(self.index_of(dst).is_some(), "copy_page: bad destination {dst}");
        assert!(self.index_of(src).is_some(), "copy_page: bad source {src}");
        assert_ne!(dst, src, "copy_page: source and destination alias");
        // SAFETY: managed pages are mapped through `mapper`; `dst` was just
        // allocated by the caller and `src` is only mapped read-only.
        unsafe {
            let from: &mut [u8; PAGE_BYTES] = self.mapper.phys_to_mut(src);
            let to: &mut [u8; PAGE_BYTES] = self.mapper.phys_to_mut(dst);
            to.copy_from_slice(from);
        }
    }

    /// Total number of managed pages.
    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.pages
    }

    /// Free pages over all CPUs.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.pools.iter().map(|p| p.free.lock().len()).sum()
    }

    /// Free pages in `cpu`'s pool.
    ///
    /// # Panics
    /// If `cpu` is not a configured CPU.
    #[must_use]
    pub fn free_pages_on(&self, cpu: CpuId) -> usize {
        self.pool(cpu).free.lock().len()
    }

    /// The managed range `[start, end)`.
    #[must_use]
    pub const fn range(&self) -> (PhysAddr, PhysAddr) {
        (self.start, self.start.add_pages(self.pages as u64))
    }

    #[must_use]
    pub const fn config(&self) -> &PmmConfig {
        &self.config
    }

    /// Move up to `steal_batch` pages from peer pools into `cpu`'s pool,
    /// one page at a time. Never holds two pool locks at once.
    fn steal(&self, cpu: CpuId) -> usize {
        let own = self.pool(cpu);
        let n = self.config.cpus;
        let mut stolen = 0;
        for step in 1..n {
            let peer = (cpu.as_usize() + step) % n;
            while stolen < self.config.steal_batch {
                let Some(idx) = self.pools[peer].free.lock().pop(&self.links) else {
                    break;
                };
                own.free.lock().push(&self.links, idx);
                stolen += 1;
            }
            if stolen == self.config.steal_batch {
                break;
            }
        }
        if stolen > 0 {
            trace!("pmm: cpu {} stole {stolen} pages", cpu.as_usize());
        }
        stolen
    }

    fn hand_out(&self, idx: u32) -> PhysAddr {
        let page = self.page_at(idx);
        debug_assert_eq!(self.refs.get(page), 0, "allocate: free page {page} has references");
        self.fill(page, ALLOC_FILL);
        page
    }

    fn release_to(&self, cpu: CpuId, idx: usize) {
        #[allow(clippy::cast_possible_truncation)]
        let idx = idx as u32;
        self.fill(self.page_at(idx), FREE_FILL);
        self.pool(cpu).free.lock().push(&self.links, idx);
    }

    fn fill(&self, page: PhysAddr, byte: u8) {
        // SAFETY: `page` is managed and not reachable from any pool or mapping
        // while it is being filled.
        let bytes: &mut [u8; PAGE_BYTES] = unsafe { self.mapper.phys_to_mut(page) };
        bytes.fill(byte);
    }

    fn pool(&self, cpu: CpuId) -> &CorePool {
        self.pools.get(cpu.as_usize()).unwrap_or_else(|| {
            panic!(
                "pmm: cpu {} out of range (0..{})",
                cpu.as_usize(),
                self.config.cpus
            )
        })
    }

    const fn page_at(&self, idx: u32) -> PhysAddr {
        self.start.add_pages(idx as u64)
    }

    /// Whether `page` lies inside the managed range.
    #[must_use]
    pub fn manages(&self, page: PhysAddr) -> bool {
        self.index_of(page).is_some()
    }

    fn index_of(&self, page: PhysAddr) -> Option<usize> {
        let off = page.as_u64().checked_sub(self.start.as_u64())?;
        let idx = usize::try_from(off / PAGE_SIZE).ok()?;
        (idx < self.pages).then_some(idx)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PmmError {
    #[error("out of physical memory")]
    OutOfMemory,
}

/// Failure while sharing or resolving a copy-on-write page.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CowError {
    #[error("no page mapped at {0}")]
    NotMapped(VirtAddr),
    #[error("mapping at {0} is read-only and not copy-on-write")]
    ReadOnly(VirtAddr),
    #[error("write fault at {0} on a mapping that is not copy-on-write")]
    NotCopyOnWrite(VirtAddr),
    #[error("page {0} is not managed by the page allocator")]
    Unmanaged(PhysAddr),
    #[error("failed to map copy-on-write page: {0}")]
    MappingFailed(#[from] kernel_vmem::MapError),
    #[error("out of physical memory")]
    OutOfMemory,
}

impl From<PmmError> for CowError {
    fn from(value: PmmError) -> Self {
        match value {
            PmmError::OutOfMemory => Self::OutOfMemory,
        }
    }
}
