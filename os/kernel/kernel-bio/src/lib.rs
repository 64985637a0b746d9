//! # Block Buffer Cache
//!
//! An in-memory copy of recently used disk blocks, and the synchronization
//! point for blocks used by several threads at once.
//!
//! ## Architecture Overview
//!
//! ```text
//!   get(dev, blockno)
//!        │ blockno % buckets
//!        ▼
//! ┌──────────────┐ ┌──────────────┐       ┌──────────────┐
//! │ bucket 0     │ │ bucket 1     │  ...  │ bucket n-1   │   SpinLock each
//! │ s3 → s0 → s7 │ │ s5           │       │ s1 → s2      │   chains of slot indices
//! └──────────────┘ └──────────────┘       └──────────────┘
//!        miss: under the eviction lock, take the unused slot with the
//!        oldest release tick from any chain and splice it onto this one
//! ```
//!
//! * A cached block is served by the same slot for as long as someone holds
//!   a reference to it.
//! * A slot with no references keeps its block until it is the least
//!   recently released unused slot and another block needs a home.
//! * Each slot's payload sits behind a [`SleepLock`](kernel_sync::SleepLock):
//!   at most one thread uses a block at a time, and it may sleep on disk I/O
//!   while holding it.
//!
//! ## Usage
//! ```rust
//! use kernel_bio::{BioConfig, Block, BlockDevice, BlockId, BufferCache, DiskError, LogicalClock};
//! use kernel_sync::SpinWait;
//!
//! struct Zeroes;
//! impl BlockDevice for Zeroes {
//!     fn read_block(&self, _: BlockId, buf: &mut Block) -> Result<(), DiskError> {
//!         buf.fill(0);
//!         Ok(())
//!     }
//!     fn write_block(&self, _: BlockId, _: &Block) -> Result<(), DiskError> {
//!         Ok(())
//!     }
//! }
//!
//! let cache = BufferCache::new(Zeroes, LogicalClock::new(), SpinWait, BioConfig::default());
//! let mut b = cache.read(1, 33).unwrap();
//! b.data_mut()[0] = 0xff;
//! cache.write(&b).unwrap();
//! cache.release(b);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod bcache;
mod disk;
mod handle;
mod ticks;

pub use crate::bcache::{BufferCache, CacheStats};
pub use crate::disk::{Block, BlockDevice, BlockId, DiskError};
pub use crate::handle::{Buf, SlotId};
pub use crate::ticks::{LogicalClock, TickSource};

pub use kernel_info::param::BLOCK_SIZE;

use kernel_info::param::{NBUCKET, NBUF};

/// Failure of a cache operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BioError {
    /// Every buffer is referenced; nothing can be evicted.
    #[error("no free buffers")]
    NoFreeBuffers,
    #[error("disk error: {0}")]
    Io(#[from] DiskError),
}

/// Geometry of the cache.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BioConfig {
    /// Number of buffer slots.
    pub buffers: usize,
    /// Number of hash chains.
    pub buckets: usize,
}

impl BioConfig {
    #[must_use]
    pub const fn with_buffers(mut self, buffers: usize) -> Self {
        self.buffers = buffers;
        self
    }

    #[must_use]
    pub const fn with_buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }

    pub(crate) fn validate(&self) {
        assert!(self.buffers > 0, "bcache: at least one buffer required");
        assert!(self.buckets > 0, "bcache: at least one bucket required");
        assert!(
            u32::try_from(self.buffers).is_ok_and(|n| n < u32::MAX),
            "bcache: too many buffers"
        );
        assert!(
            u32::try_from(self.buckets).is_ok(),
            "bcache: too many buckets"
        );
    }
}

impl Default for BioConfig {
    fn default() -> Self {
        Self {
            buffers: NBUF,
            buckets: NBUCKET,
        }
    }
}
