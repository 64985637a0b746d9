use crate::BufferCache;
use crate::disk::{Block, BlockDevice, BlockId};
use crate::ticks::TickSource;
use core::fmt;
use kernel_sync::{Scheduler, SleepLockGuard};

/// Index of a buffer slot, as returned by [`BufferCache::pin`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A referenced buffer, normally holding the slot's sleep lock.
///
/// Give it back with [`BufferCache::release`]. A handle that is simply
/// dropped still returns its reference.
pub struct Buf<'a, D: BlockDevice, T: TickSource, S: Scheduler> {
    cache: &'a BufferCache<D, T, S>,
    slot: SlotId,
    id: BlockId,
    guard: Option<SleepLockGuard<'a, Block, S>>,
    /// Whether dropping the handle still owes a reference.
    armed: bool,
}

impl<'a, D: BlockDevice, T: TickSource, S: Scheduler> Buf<'a, D, T, S> {
    pub(crate) fn new(
        cache: &'a BufferCache<D, T, S>,
        slot: SlotId,
        id: BlockId,
        guard: SleepLockGuard<'a, Block, S>,
    ) -> Self {
        Self {
            cache,
            slot,
            id,
            guard: Some(guard),
            armed: true,
        }
    }

    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Whether the handle currently holds the slot's sleep lock.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    /// Whether the contents reflect the disk block.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cache.slot(self.slot).is_valid()
    }

    /// # Panics
    /// If the handle is unlocked.
    #[must_use]
    pub fn data(&self) -> &Block {
        match &self.guard {
            Some(g) => &**g,
            None => panic!("buf: {} read while unlocked", self.id),
        }
    }

    /// # Panics
    /// If the handle is unlocked.
    pub fn data_mut(&mut self) -> &mut Block {
        match &mut self.guard {
            Some(g) => &mut **g,
            None => panic!("buf: {} written while unlocked", self.id),
        }
    }

    /// Let go of the sleep lock but keep the reference.
    pub fn unlock(&mut self) {
        self.guard = None;
    }

    /// Take the sleep lock again after [`unlock`](Self::unlock), blocking
    /// while another handle holds it.
    ///
    /// # Panics
    /// If the handle already holds the lock.
    pub fn lock(&mut self) {
        assert!(self.guard.is_none(), "buf: {} already locked", self.id);
        let cache = self.cache;
        self.guard = Some(cache.slot(self.slot).data.lock(cache.scheduler()));
    }

    pub(crate) const fn cache(&self) -> &'a BufferCache<D, T, S> {
        self.cache
    }

    /// Stop the drop path from releasing; hands over the lock guard.
    pub(crate) fn disarm(&mut self) -> Option<SleepLockGuard<'a, Block, S>> {
        self.armed = false;
        self.guard.take()
    }
}

impl<D: BlockDevice, T: TickSource, S: Scheduler> Drop for Buf<'_, D, T, S> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.unref(self.slot);
        }
    }
}

impl<D: BlockDevice, T: TickSource, S: Scheduler> fmt::Debug for Buf<'_, D, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("id", &self.id)
            .field("slot", &self.slot.0)
            .field("locked", &self.is_locked())
            .finish()
    }
}
