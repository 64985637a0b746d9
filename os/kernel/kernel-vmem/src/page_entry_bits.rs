use crate::PhysAddr;
use bitfield_struct::bitfield;

/// A single 64-bit x86-64 leaf page table entry in its raw bitfield form.
///
/// The layout follows the hardware definition. One of the OS-available bits
/// (bit 9) is claimed by the kernel to mark **copy-on-write** mappings: such
/// an entry is read-only in hardware, and a write to it faults into the COW
/// handler, which either copies the page or restores write access.
///
/// ### Bit layout
///
/// | Bits      | Name              | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P`               | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty |
/// | 7         | `PS`/`PAT`        | Large page (non-leaf levels) |
/// | 8         | `G`               | Global |
/// | 9         | COW               | Software: copy-on-write share |
/// | 10–11     | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU`             | Protection key |
/// | 63        | `NX`              | Execute disable |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntryBits, PhysAddr};
/// let e = PageEntryBits::user_rw(PhysAddr::new(0x12_3000));
/// let shared = e.into_copy_on_write();
/// assert!(!shared.writable());
/// assert!(shared.copy_on_write());
/// assert_eq!(shared.physical_address(), PhysAddr::new(0x12_3000));
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1). Clear for read-only.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write.
    pub dirty: bool,

    /// Large Page / PAT (bit 7). Always clear for 4 KiB leaves handled here.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// Copy-on-write (bit 9, OS-available).
    ///
    /// Set together with `writable = false` on every mapping that shares a
    /// page after `fork`. Each such entry holds one reference in the page
    /// allocator's reference-count table.
    pub copy_on_write: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (bits 59..=62).
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysAddr) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysAddr {
        PhysAddr::new(self.phys_addr_bits_51_12() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysAddr) -> Self {
        self.set_physical_address(phys);
        self
    }

    /// A present, user-accessible, writable leaf for `phys`.
    #[inline]
    #[must_use]
    pub const fn user_rw(phys: PhysAddr) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_no_execute(true)
            .with_physical_address(phys)
    }

    /// A present, user-accessible, read-only leaf for `phys`.
    #[inline]
    #[must_use]
    pub const fn user_ro(phys: PhysAddr) -> Self {
        Self::user_rw(phys).with_writable(false)
    }

    /// The same mapping, downgraded to read-only and flagged copy-on-write.
    #[inline]
    #[must_use]
    pub const fn into_copy_on_write(self) -> Self {
        self.with_writable(false).with_copy_on_write(true)
    }

    /// The same mapping with write access restored and the COW flag cleared.
    #[inline]
    #[must_use]
    pub const fn into_private_writable(self) -> Self {
        self.with_writable(true).with_copy_on_write(false)
    }

    /// Whether the entry may be shared copy-on-write: it is writable, or it
    /// is already a COW share.
    #[inline]
    #[must_use]
    pub const fn is_cow_candidate(self) -> bool {
        self.present() && (self.writable() || self.copy_on_write())
    }
}
