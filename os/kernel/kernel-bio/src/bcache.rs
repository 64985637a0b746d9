use crate::disk::{Block, BlockDevice, BlockId};
use crate::handle::{Buf, SlotId};
use crate::ticks::TickSource;
use crate::{BioConfig, BioError};
use alloc::boxed::Box;
use core::iter;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use kernel_info::param::BLOCK_SIZE;
use kernel_sync::{Scheduler, SleepLock, SpinLock, SpinLockGuard};
use log::{debug, trace, warn};

/// End-of-chain marker.
const NIL: u32 = u32::MAX;

/// One cached block.
///
/// The bookkeeping fields are atomics only so they can be shared; each has
/// one lock that orders it:
///
/// | Field | Guarded by |
/// |-------|------------|
/// | `key`, `bound`, `bucket` | both bucket locks and the eviction lock while relinking |
/// | `tick`, `next` | the lock of the bucket the slot is in |
/// | `refcnt` | the bucket lock for hits and releases, the eviction lock for pins, both for unpins |
/// | `valid`, `data` | the slot's sleep lock |
pub(crate) struct Slot {
    key: AtomicU64,
    bound: AtomicBool,
    bucket: AtomicU32,
    refcnt: AtomicU32,
    tick: AtomicU64,
    next: AtomicU32,
    valid: AtomicBool,
    pub(crate) data: SleepLock<Block>,
}

impl Slot {
    fn new() -> Self {
        Self {
            key: AtomicU64::new(0),
            bound: AtomicBool::new(false),
            bucket: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            tick: AtomicU64::new(0),
            next: AtomicU32::new(NIL),
            valid: AtomicBool::new(false),
            data: SleepLock::new("buffer", [0; BLOCK_SIZE]),
        }
    }

    fn holds(&self, id: BlockId) -> bool {
        self.bound.load(Ordering::Relaxed) && self.key.load(Ordering::Relaxed) == id.pack()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    pub(crate) fn set_valid(&self) {
        self.valid.store(true, Ordering::Relaxed);
    }
}

/// Head of one hash chain.
struct Bucket {
    head: u32,
}

/// Cache hit and miss counters.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// Lookups served by a slot already holding the block.
    pub hits: u64,
    /// Lookups that had to claim an unused slot.
    pub misses: u64,
    /// Misses whose slot was still holding another block.
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// A fixed set of block buffers shared by all CPUs.
///
/// Lookups hash `blockno` into one of `buckets` chains, each with its own
/// spin lock, so hits on different chains never contend. Claiming a slot for
/// a new block is serialized by a cache-wide eviction lock, which also
/// protects pin counts.
///
/// Lock order: eviction lock, then bucket locks in increasing index. Slot
/// sleep locks are only taken with no spin lock held.
pub struct BufferCache<D, T, S> {
    slots: Box<[Slot]>,
    buckets: Box<[SpinLock<Bucket>]>,
    evict: SpinLock<()>,
    counters: Counters,
    disk: D,
    clock: T,
    sched: S,
    config: BioConfig,
}

impl<D: BlockDevice, T: TickSource, S: Scheduler> BufferCache<D, T, S> {
    /// A cache of `config.buffers` empty slots in front of `disk`.
    ///
    /// # Panics
    /// If `config` asks for no buffers or no buckets.
    #[must_use]
    pub fn new(disk: D, clock: T, sched: S, config: BioConfig) -> Self {
        config.validate();
        let slots: Box<[Slot]> = (0..config.buffers).map(|_| Slot::new()).collect();
        let buckets = (0..config.buckets)
            .map(|_| SpinLock::new("bcache.bucket", Bucket { head: NIL }))
            .collect();

        let this = Self {
            slots,
            buckets,
            evict: SpinLock::new("bcache", ()),
            counters: Counters::default(),
            disk,
            clock,
            sched,
            config,
        };

        // Unbound slots start out on chain 0, in slot order.
        {
            let mut first = this.buckets[0].lock();
            for s in (0..this.slots.len()).rev() {
                #[allow(clippy::cast_possible_truncation)]
                this.push(&mut first, s as u32);
            }
        }

        debug!(
            "bcache: {} buffers in {} buckets",
            config.buffers, config.buckets
        );
        this
    }

    /// A locked buffer for `(dev, blockno)`, not necessarily read from disk.
    ///
    /// Blocks while another thread holds the buffer.
    ///
    /// # Errors
    /// [`BioError::NoFreeBuffers`] if the block is not cached and every
    /// buffer is in use.
    pub fn get(&self, dev: u32, blockno: u32) -> Result<Buf<'_, D, T, S>, BioError> {
        let id = BlockId::new(dev, blockno);
        let target = self.bucket_of(id);

        if let Some(slot) = self.lookup(target, id) {
            return Ok(self.lock_slot(slot, id));
        }

        let evict = self.evict.lock();
        // Someone may have installed the block since the unlocked lookup.
        if let Some(slot) = self.lookup(target, id) {
            drop(evict);
            return Ok(self.lock_slot(slot, id));
        }
        let slot = self.claim(target, id)?;
        drop(evict);
        Ok(self.lock_slot(slot, id))
    }

    /// A locked buffer holding the contents of `(dev, blockno)`.
    ///
    /// # Errors
    /// - [`BioError::NoFreeBuffers`] as for [`get`](Self::get).
    /// - [`BioError::Io`] if the disk read fails; the buffer is released.
    pub fn read(&self, dev: u32, blockno: u32) -> Result<Buf<'_, D, T, S>, BioError> {
        let mut buf = self.get(dev, blockno)?;
        if !buf.is_valid() {
            let id = buf.id();
            self.disk.read_block(id, buf.data_mut())?;
            self.slot(buf.slot()).set_valid();
            trace!("bcache: read {id} from disk");
        }
        Ok(buf)
    }

    /// Write `buf`'s contents to disk.
    ///
    /// # Errors
    /// [`BioError::Io`] if the disk write fails.
    ///
    /// # Panics
    /// If `buf` is not locked or belongs to another cache.
    pub fn write(&self, buf: &Buf<'_, D, T, S>) -> Result<(), BioError> {
        self.assert_owned(buf, "bwrite");
        assert!(buf.is_locked(), "bwrite: buffer {} not locked", buf.id());
        self.disk.write_block(buf.id(), buf.data())?;
        Ok(())
    }

    /// Give up a locked buffer. When the last reference goes, the buffer
    /// becomes the most recently used unused buffer.
    ///
    /// # Panics
    /// If `buf` is not locked or belongs to another cache.
    pub fn release(&self, mut buf: Buf<'_, D, T, S>) {
        self.assert_owned(&buf, "brelse");
        assert!(buf.is_locked(), "brelse: buffer {} not locked", buf.id());
        let guard = buf.disarm();
        self.unref(buf.slot());
        drop(guard);
    }

    /// Keep `buf`'s slot bound to its block past [`release`](Self::release).
    ///
    /// # Panics
    /// If `buf` belongs to another cache.
    pub fn pin(&self, buf: &Buf<'_, D, T, S>) -> SlotId {
        self.assert_owned(buf, "bpin");
        let _evict = self.evict.lock();
        self.slot(buf.slot()).refcnt.fetch_add(1, Ordering::Relaxed);
        buf.slot()
    }

    /// Drop a reference taken by [`pin`](Self::pin).
    ///
    /// # Panics
    /// If the slot has no references.
    pub fn unpin(&self, slot: SlotId) {
        let _evict = self.evict.lock();
        let s = self.slot(slot);
        let bucket = s.bucket.load(Ordering::Relaxed) as usize;
        let _chain = self.buckets[bucket].lock();
        let Ok(before) = s
            .refcnt
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        else {
            panic!("bunpin: slot {} has no references", slot.index());
        };
        if before == 1 {
            s.tick.store(self.clock.now(), Ordering::Relaxed);
        }
    }

    /// References currently held on `slot`: handles plus pins.
    #[must_use]
    pub fn references(&self, slot: SlotId) -> u32 {
        let bucket = self.slot(slot).bucket.load(Ordering::Relaxed) as usize;
        let _chain = self.buckets[bucket].lock();
        self.slot(slot).refcnt.load(Ordering::Relaxed)
    }

    /// The block `slot` is bound to, if any.
    #[must_use]
    pub fn block_of(&self, slot: SlotId) -> Option<BlockId> {
        let _evict = self.evict.lock();
        let s = self.slot(slot);
        s.bound
            .load(Ordering::Relaxed)
            .then(|| BlockId::unpack(s.key.load(Ordering::Relaxed)))
    }

    /// Hit, miss and eviction counters since construction.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// The geometry the cache was built with.
    #[must_use]
    pub const fn config(&self) -> &BioConfig {
        &self.config
    }

    /// The device behind the cache.
    #[must_use]
    pub const fn disk(&self) -> &D {
        &self.disk
    }

    /// The clock that stamps released slots.
    #[must_use]
    pub const fn clock(&self) -> &T {
        &self.clock
    }

    pub(crate) const fn scheduler(&self) -> &S {
        &self.sched
    }

    pub(crate) fn slot(&self, slot: SlotId) -> &Slot {
        &self.slots[slot.index()]
    }

    /// Drop one reference, stamping the LRU tick when it was the last.
    pub(crate) fn unref(&self, slot: SlotId) {
        let s = self.slot(slot);
        let bucket = s.bucket.load(Ordering::Relaxed) as usize;
        let _chain = self.buckets[bucket].lock();
        // Pins change the count under the eviction lock; only the decrement
        // that reaches zero stamps.
        let Ok(before) = s
            .refcnt
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        else {
            panic!("brelse: slot {} has no references", slot.index());
        };
        if before == 1 {
            s.tick.store(self.clock.now(), Ordering::Relaxed);
        }
    }

    /// Find `id` in `bucket` and take a reference on it.
    fn lookup(&self, bucket: usize, id: BlockId) -> Option<u32> {
        let chain = self.buckets[bucket].lock();
        let slot = self.chain(chain.head).find(|&s| self.slots[s as usize].holds(id))?;
        self.slots[slot as usize]
            .refcnt
            .fetch_add(1, Ordering::Relaxed);
        drop(chain);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(slot)
    }

    /// Rebind the least recently used unused slot to `id` and move it onto
    /// chain `target`. Caller holds the eviction lock.
    fn claim(&self, target: usize, id: BlockId) -> Result<u32, BioError> {
        loop {
            let Some((victim, from)) = self.least_recent() else {
                warn!("bcache: no free buffers for {id}");
                return Err(BioError::NoFreeBuffers);
            };
            let s = &self.slots[victim as usize];

            if from == target {
                let mut chain = self.buckets[target].lock();
                if s.refcnt.load(Ordering::Relaxed) != 0 {
                    continue;
                }
                self.rebind(s, id, target);
                // Move to the front, as a relinked slot would be.
                self.unlink(&mut chain, victim);
                self.push(&mut chain, victim);
            } else {
                let (mut old, mut new) = self.lock_pair(from, target);
                if s.refcnt.load(Ordering::Relaxed) != 0 {
                    continue;
                }
                self.rebind(s, id, target);
                self.unlink(&mut old, victim);
                self.push(&mut new, victim);
            }
            return Ok(victim);
        }
    }

    fn rebind(&self, s: &Slot, id: BlockId, target: usize) {
        let was_bound = s.bound.swap(true, Ordering::Relaxed);
        if was_bound {
            let old = BlockId::unpack(s.key.load(Ordering::Relaxed));
            trace!("bcache: evict {old} for {id}");
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        s.key.store(id.pack(), Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        s.bucket.store(target as u32, Ordering::Relaxed);
        s.refcnt.store(1, Ordering::Relaxed);
        s.valid.store(false, Ordering::Relaxed);
    }

    /// The unused slot with the oldest tick, and the chain it is on. Chains
    /// are visited in index order and each is walked front to back; the first
    /// of equally old slots wins.
    fn least_recent(&self) -> Option<(u32, usize)> {
        let mut best: Option<(u32, usize, u64)> = None;
        for (b, bucket) in self.buckets.iter().enumerate() {
            let chain = bucket.lock();
            for s in self.chain(chain.head) {
                let slot = &self.slots[s as usize];
                if slot.refcnt.load(Ordering::Relaxed) != 0 {
                    continue;
                }
                let tick = slot.tick.load(Ordering::Relaxed);
                if best.is_none_or(|(_, _, t)| tick < t) {
                    best = Some((s, b, tick));
                }
            }
        }
        best.map(|(s, b, _)| (s, b))
    }

    /// Lock buckets `a` and `b` (distinct) lower index first; guards are
    /// returned in argument order.
    fn lock_pair(
        &self,
        a: usize,
        b: usize,
    ) -> (SpinLockGuard<'_, Bucket>, SpinLockGuard<'_, Bucket>) {
        debug_assert_ne!(a, b);
        if a < b {
            let ga = self.buckets[a].lock();
            (ga, self.buckets[b].lock())
        } else {
            let gb = self.buckets[b].lock();
            (self.buckets[a].lock(), gb)
        }
    }

    fn chain(&self, head: u32) -> impl Iterator<Item = u32> + '_ {
        iter::successors((head != NIL).then_some(head), move |&s| {
            let next = self.slots[s as usize].next.load(Ordering::Relaxed);
            (next != NIL).then_some(next)
        })
    }

    fn push(&self, chain: &mut Bucket, slot: u32) {
        self.slots[slot as usize]
            .next
            .store(chain.head, Ordering::Relaxed);
        chain.head = slot;
    }

    fn unlink(&self, chain: &mut Bucket, slot: u32) {
        let next = self.slots[slot as usize].next.load(Ordering::Relaxed);
        if chain.head == slot {
            chain.head = next;
        } else {
            let Some(prev) = self
                .chain(chain.head)
                .find(|&p| self.slots[p as usize].next.load(Ordering::Relaxed) == slot)
            else {
                panic!("bget: slot {slot} missing from its chain");
            };
            self.slots[prev as usize]
                .next
                .store(next, Ordering::Relaxed);
        }
        self.slots[slot as usize].next.store(NIL, Ordering::Relaxed);
    }

    fn lock_slot(&self, slot: u32, id: BlockId) -> Buf<'_, D, T, S> {
        let slot = SlotId::new(slot);
        let guard = self.slot(slot).data.lock(&self.sched);
        Buf::new(self, slot, id, guard)
    }

    fn bucket_of(&self, id: BlockId) -> usize {
        id.blockno as usize % self.buckets.len()
    }

    fn assert_owned(&self, buf: &Buf<'_, D, T, S>, op: &str) {
        assert!(
            core::ptr::eq(buf.cache(), self),
            "{op}: buffer {} belongs to another cache",
            buf.id()
        );
    }
}
