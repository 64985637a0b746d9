//! # Physical Page Allocator
//!
//! Hands out and takes back 4 KiB physical pages on a multi-core machine, and
//! tracks how many copy-on-write mappings share each page.
//!
//! ## Architecture Overview
//!
//! ```text
//!   cpu 0            cpu 1                    cpu N-1
//! ┌─────────┐      ┌─────────┐              ┌─────────┐
//! │ kmem 0  │ ◄──► │ kmem 1  │ ◄── steal ──►│ kmem N-1│   one SpinLock each
//! └────┬────┘      └────┬────┘              └────┬────┘
//!      └──────────┬─────┴───────────┬────────────┘
//!                 ▼                 ▼
//!          page links[]       COW refcounts[]              shared, indexed by page
//! ```
//!
//! * **Per-CPU pools** ([`PageAllocator`]): `allocate` and `free` touch the
//!   caller's pool only, so CPUs do not contend on the common path.
//! * **Bounded stealing**: an empty pool refills itself from its peers, a
//!   batch at a time, for a fixed number of passes before reporting
//!   [`PmmError::OutOfMemory`].
//! * **Reference counts** ([`RefCountTable`]): one `u16` per page counting the
//!   COW page table entries that point at it.
//! * **COW helpers** ([`cow`]): sharing an address range with a child,
//!   resolving write faults, and tearing shared mappings down.
//!
//! Callers pass their CPU explicitly as a [`CpuId`]; in the kernel this is
//! read with interrupts disabled, in tests it simulates a core per thread.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_pmm::{CpuId, PageAllocator, PmmConfig, phys_mapper::HhdmPhysMapper};
//! use kernel_vmem::PhysAddr;
//! use kernel_vmem::info::{KERNEL_END, PHYS_TOP};
//!
//! let pmm = unsafe {
//!     PageAllocator::new(
//!         HhdmPhysMapper,
//!         PhysAddr::new(KERNEL_END),
//!         PhysAddr::new(PHYS_TOP),
//!         PmmConfig::default(),
//!     )
//! };
//! let page = pmm.allocate(CpuId::new(0)).expect("out of memory");
//! pmm.free(page, CpuId::new(0));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod cow;
mod frame_alloc;
mod free_list;
pub mod phys_mapper;
mod refcount;

pub use crate::frame_alloc::{CowError, PageAllocator, PmmError};
pub use crate::refcount::RefCountTable;

use kernel_info::memory::PAGE_SIZE;
use kernel_info::param::{NCPU, STEAL_BATCH, STEAL_ROUNDS};

/// Size of one page as a byte count.
#[allow(clippy::cast_possible_truncation)]
pub(crate) const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Index of the CPU performing an operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct CpuId(usize);

impl CpuId {
    #[inline]
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// Tunables of the page allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PmmConfig {
    /// Number of per-CPU pools.
    pub cpus: usize,
    /// Pages moved into an empty pool per stealing pass.
    pub steal_batch: usize,
    /// Stealing passes before giving up.
    pub steal_rounds: usize,
}

impl PmmConfig {
    #[must_use]
    pub const fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    #[must_use]
    pub const fn with_steal_batch(mut self, steal_batch: usize) -> Self {
        self.steal_batch = steal_batch;
        self
    }

    #[must_use]
    pub const fn with_steal_rounds(mut self, steal_rounds: usize) -> Self {
        self.steal_rounds = steal_rounds;
        self
    }

    pub(crate) const fn validate(&self) {
        assert!(self.cpus > 0, "pmm: at least one cpu required");
        assert!(self.steal_batch > 0, "pmm: steal batch must be positive");
        assert!(self.steal_rounds > 0, "pmm: steal rounds must be positive");
    }
}

impl Default for PmmConfig {
    fn default() -> Self {
        Self {
            cpus: NCPU,
            steal_batch: STEAL_BATCH,
            steal_rounds: STEAL_ROUNDS,
        }
    }
}
