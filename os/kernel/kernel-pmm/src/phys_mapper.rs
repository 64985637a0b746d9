//! # HHDM-based `PhysMapper`
//!
//! With a higher-half direct map every physical address is visible at
//! `HHDM_BASE + pa`. The page allocator writes its junk fills and COW copies
//! through this window.
//!
//! ## Example
//! ```rust
//! use kernel_pmm::phys_mapper::HhdmPhysMapper;
//! use kernel_vmem::{PhysAddr, VirtAddr};
//!
//! let va = HhdmPhysMapper::virtual_address(PhysAddr::new(0x20_3000));
//! assert_eq!(va, VirtAddr::new(0xffff_8880_0020_3000));
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_vmem::{PhysAddr, PhysMapper, VirtAddr};

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// # Safety
/// - The HHDM mapping must be present and cover the referenced physical range.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// Where `pa` appears inside the direct map.
    #[inline]
    #[must_use]
    pub const fn virtual_address(pa: PhysAddr) -> VirtAddr {
        VirtAddr::new(HHDM_BASE + pa.as_u64())
    }
}

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        let va = Self::virtual_address(pa).as_u64() as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }
}
