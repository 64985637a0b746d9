#![allow(dead_code)]

use kernel_bio::{BLOCK_SIZE, BioConfig, Block, BlockDevice, BlockId, BufferCache, DiskError, LogicalClock};
use kernel_sync::{Channel, Scheduler, SpinLockGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// A disk kept in a map; unwritten blocks read as zeroes.
#[derive(Default)]
pub struct MemDisk {
    blocks: Mutex<BTreeMap<BlockId, Block>>,
    broken: Mutex<BTreeSet<BlockId>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MemDisk {
    pub fn put(&self, id: BlockId, fill: u8) {
        self.blocks.lock().unwrap().insert(id, [fill; BLOCK_SIZE]);
    }

    pub fn block(&self, id: BlockId) -> Option<Block> {
        self.blocks.lock().unwrap().get(&id).copied()
    }

    /// Make every transfer of `id` fail.
    pub fn break_block(&self, id: BlockId) {
        self.broken.lock().unwrap().insert(id);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, id: BlockId, buf: &mut Block) -> Result<(), DiskError> {
        if self.broken.lock().unwrap().contains(&id) {
            return Err(DiskError::Failed(id));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        *buf = self.block(id).unwrap_or([0; BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, id: BlockId, buf: &Block) -> Result<(), DiskError> {
        if self.broken.lock().unwrap().contains(&id) {
            return Err(DiskError::Failed(id));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.blocks.lock().unwrap().insert(id, *buf);
        Ok(())
    }
}

/// Sleeping yields the OS thread; waiters re-check on return.
#[derive(Default)]
pub struct Yielding;

impl Scheduler for Yielding {
    fn sleep<T>(&self, _chan: Channel, guard: SpinLockGuard<'_, T>) {
        drop(guard);
        thread::yield_now();
    }

    fn wakeup(&self, _chan: Channel) {}
}

pub type Cache = BufferCache<MemDisk, LogicalClock, Yielding>;
pub type Buf<'a> = kernel_bio::Buf<'a, MemDisk, LogicalClock, Yielding>;

pub fn cache(buffers: usize, buckets: usize) -> Cache {
    BufferCache::new(
        MemDisk::default(),
        LogicalClock::new(),
        Yielding,
        BioConfig::default()
            .with_buffers(buffers)
            .with_buckets(buckets),
    )
}
