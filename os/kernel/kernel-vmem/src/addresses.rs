//! Physical and virtual address newtypes.
//!
//! Zero-cost `u64` wrappers so physical and virtual addresses cannot be mixed
//! up at compile time.

use crate::info::{PAGE_SHIFT, PAGE_SIZE};
use core::fmt;

/// A physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(u64);

/// A virtual memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(u64);

macro_rules! addr_common {
    ($t:ident, $label:literal) => {
        impl $t {
            #[inline]
            #[must_use]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// `true` if the address sits on a page boundary.
            #[inline]
            #[must_use]
            pub const fn is_page_aligned(self) -> bool {
                self.0 & (PAGE_SIZE - 1) == 0
            }

            /// The base of the page containing this address.
            #[inline]
            #[must_use]
            pub const fn page_round_down(self) -> Self {
                Self(self.0 & !(PAGE_SIZE - 1))
            }

            /// The first page boundary at or above this address.
            #[inline]
            #[must_use]
            pub const fn page_round_up(self) -> Self {
                Self((self.0 + PAGE_SIZE - 1) & !(PAGE_SIZE - 1))
            }

            /// Page frame number (`addr >> PAGE_SHIFT`).
            #[inline]
            #[must_use]
            pub const fn page_number(self) -> u64 {
                self.0 >> PAGE_SHIFT
            }

            /// The address `pages` pages above this one.
            #[inline]
            #[must_use]
            pub const fn add_pages(self, pages: u64) -> Self {
                Self(self.0 + pages * PAGE_SIZE)
            }
        }

        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({:#018x})"), self.0)
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u64> for $t {
            #[inline]
            fn from(addr: u64) -> Self {
                Self(addr)
            }
        }
    };
}

addr_common!(PhysAddr, "PA");
addr_common!(VirtAddr, "VA");
