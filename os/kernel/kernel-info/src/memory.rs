//! # Memory Layout

/// Size of a physical page in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel image is placed in physical memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Default first byte after the kernel image. Pages below are never handed
/// out by the page allocator.
pub const KERNEL_END: u64 = PHYS_LOAD + 0x0070_0000; // 8 MiB

/// Default end of allocatable physical memory (exclusive).
pub const PHYS_TOP: u64 = PHYS_LOAD + 128 * 1024 * 1024;

/// Byte written over a page when it is handed out.
///
/// Readers of stale data see this instead of the previous owner's bytes.
pub const ALLOC_FILL: u8 = 0x05;

/// Byte written over a page when it is returned to a free pool.
pub const FREE_FILL: u8 = 0x01;

/// Round `addr` up to the next page boundary.
#[inline]
#[must_use]
pub const fn page_round_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Round `addr` down to its page boundary.
#[inline]
#[must_use]
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(KERNEL_END.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_TOP.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_TOP > KERNEL_END);
    assert!(ALLOC_FILL != FREE_FILL);
    assert!(ALLOC_FILL != 0 && FREE_FILL != 0);
};
