//! # Kernel Configuration
//!
//! Compile-time constants shared by the kernel's resource managers. This crate
//! is the single source of truth for page geometry, the default managed
//! physical range, CPU count and buffer cache sizing, so that the page
//! allocator, the buffer cache and their tests agree on the same numbers.
//!
//! ## Modules
//!
//! ### Memory ([`memory`])
//! * **Page Geometry**: [`PAGE_SIZE`](memory::PAGE_SIZE) and its shift
//! * **Managed Range**: default bounds of allocatable physical memory
//! * **Fill Patterns**: junk bytes written on allocation and free
//!
//! ### Parameters ([`param`])
//! * **CPUs**: maximum number of cores, each with its own free-page pool
//! * **Buffer Cache**: number of buffers, index shards and the block size
//! * **Stealing**: bounds on cross-core page stealing
//!
//! ## Runtime Configuration
//!
//! The managers accept small config structs (`PmmConfig`, `BioConfig`) whose
//! defaults are taken from here. Tests shrink them to exercise exhaustion and
//! eviction with a handful of pages or buffers.
//!
//! ```rust
//! use kernel_info::memory::PAGE_SIZE;
//! use kernel_info::param::{NBUF, NBUCKET};
//!
//! assert_eq!(PAGE_SIZE, 4096);
//! assert!(NBUF >= NBUCKET);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod param;
