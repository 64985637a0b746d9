//! Host doubles: a RAM arena standing in for physical memory and a map-backed page table.

#![allow(dead_code)]

use kernel_pmm::{CpuId, PageAllocator, PmmConfig};
use kernel_vmem::info::PAGE_SIZE;
use kernel_vmem::{MapError, PageEntryBits, PageTableOps, PhysAddr, PhysMapper, VirtAddr};
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const BASE: u64 = 0x80_0000;
const PAGE: usize = PAGE_SIZE as usize;

pub struct Ram {
    base: u64,
    frames: Box<[UnsafeCell<[u8; PAGE]>]>,
}

// Accesses are serialized by the allocator's ownership of each page.
unsafe impl Sync for Ram {}
unsafe impl Send for Ram {}

impl Ram {
    pub fn new(pages: usize) -> Self {
        Self {
            base: BASE,
            frames: (0..pages).map(|_| UnsafeCell::new([0xAA; PAGE])).collect(),
        }
    }

    pub fn start(&self) -> PhysAddr {
        PhysAddr::new(self.base)
    }

    pub fn end(&self) -> PhysAddr {
        PhysAddr::new(self.base + self.frames.len() as u64 * PAGE_SIZE)
    }

    fn frame(&self, pa: PhysAddr) -> *mut u8 {
        let off = usize::try_from(pa.as_u64() - self.base).unwrap();
        let cell = &self.frames[off / PAGE];
        unsafe { cell.get().cast::<u8>().add(off % PAGE) }
    }

    pub fn page(&self, pa: PhysAddr) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(self.frame(pa), PAGE).to_vec() }
    }

    pub fn fill(&self, pa: PhysAddr, byte: u8) {
        unsafe { std::ptr::write_bytes(self.frame(pa), byte, PAGE) }
    }
}

#[derive(Clone)]
pub struct RamMapper(pub Arc<Ram>);

impl PhysMapper for RamMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        unsafe { &mut *self.0.frame(pa).cast::<T>() }
    }
}

/// An allocator over a fresh arena of `pages` pages, with the arena kept for inspection.
pub fn allocator(pages: usize, config: PmmConfig) -> (PageAllocator<RamMapper>, Arc<Ram>) {
    let ram = Arc::new(Ram::new(pages));
    let pmm = unsafe { PageAllocator::new(RamMapper(ram.clone()), ram.start(), ram.end(), config) };
    (pmm, ram)
}

pub fn cpus(n: usize) -> PmmConfig {
    PmmConfig::default().with_cpus(n)
}

pub const CPU0: CpuId = CpuId::new(0);
pub const CPU1: CpuId = CpuId::new(1);

/// A single-level page table keyed by virtual page.
#[derive(Default)]
pub struct MapTable {
    entries: BTreeMap<u64, PageEntryBits>,
    /// Refuse every `map_page` with this error.
    pub refuse: Option<MapError>,
}

impl MapTable {
    pub fn refusing(error: MapError) -> Self {
        Self {
            entries: BTreeMap::new(),
            refuse: Some(error),
        }
    }

    pub fn entry(&self, va: VirtAddr) -> Option<PageEntryBits> {
        self.entries.get(&va.as_u64()).copied().filter(|e| e.present())
    }

    pub fn mapped(&self) -> usize {
        self.entries.values().filter(|e| e.present()).count()
    }
}

impl PageTableOps for MapTable {
    fn map_page(
        &mut self,
        va: VirtAddr,
        size: u64,
        pa: PhysAddr,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        if let Some(e) = self.refuse {
            return Err(e);
        }
        if !va.is_page_aligned() {
            return Err(MapError::Unaligned(va));
        }
        let pages = size.div_ceil(PAGE_SIZE);
        for n in 0..pages {
            if self.entry(va.add_pages(n)).is_some() {
                return Err(MapError::AlreadyMapped(va.add_pages(n)));
            }
        }
        for n in 0..pages {
            let entry = flags
                .with_present(true)
                .with_physical_address(pa.add_pages(n));
            self.entries.insert(va.add_pages(n).as_u64(), entry);
        }
        Ok(())
    }

    fn walk(&mut self, va: VirtAddr, create: bool) -> Option<&mut PageEntryBits> {
        let key = va.page_round_down().as_u64();
        if create {
            Some(self.entries.entry(key).or_insert_with(PageEntryBits::new))
        } else {
            self.entries.get_mut(&key)
        }
    }

    fn unmap_range(&mut self, va: VirtAddr, pages: u64, free_underlying: bool) {
        assert!(!free_underlying, "test table owns no allocator");
        for n in 0..pages {
            let removed = self.entries.remove(&va.add_pages(n).as_u64());
            assert!(removed.is_some_and(|e| e.present()), "unmap: not mapped");
        }
    }
}
