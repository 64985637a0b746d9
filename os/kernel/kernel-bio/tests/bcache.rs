mod support;

use kernel_bio::{BioConfig, BioError, BlockId, CacheStats, DiskError, SlotId};
use std::sync::{Arc, Barrier};
use std::thread;
use support::{Buf, Cache, cache};

const DEV: u32 = 1;

fn id(blockno: u32) -> BlockId {
    BlockId::new(DEV, blockno)
}

/// Read and release `blockno` one clock tick after the previous touch.
fn touch(c: &Cache, blockno: u32) {
    let b = c.read(DEV, blockno).unwrap();
    c.clock().tick();
    c.release(b);
}

#[test]
fn read_goes_to_disk_once() {
    let c = cache(4, 3);
    c.disk().put(id(7), 0x42);

    let b = c.read(DEV, 7).unwrap();
    assert!(b.is_valid());
    assert!(b.data().iter().all(|&x| x == 0x42));
    c.release(b);

    let b = c.read(DEV, 7).unwrap();
    assert_eq!(b.data()[0], 0x42);
    c.release(b);

    assert_eq!(c.disk().reads(), 1);
    assert_eq!(
        c.stats(),
        CacheStats {
            hits: 1,
            misses: 1,
            evictions: 0
        }
    );
}

#[test]
fn get_does_not_read() {
    let c = cache(2, 1);
    let b = c.get(DEV, 3).unwrap();
    assert!(!b.is_valid());
    assert_eq!(b.id(), id(3));
    c.release(b);
    assert_eq!(c.disk().reads(), 0);
}

#[test]
fn devices_are_distinct_blocks() {
    let c = cache(4, 2);
    c.disk().put(BlockId::new(1, 9), 1);
    c.disk().put(BlockId::new(2, 9), 2);

    let a = c.read(1, 9).unwrap();
    let b = c.read(2, 9).unwrap();
    assert_ne!(a.slot(), b.slot());
    assert_eq!((a.data()[0], b.data()[0]), (1, 2));
    c.release(a);
    c.release(b);
}

#[test]
fn live_block_keeps_its_slot() {
    let c = cache(2, 1);
    let mut first = c.read(DEV, 1).unwrap();
    let slot = first.slot();
    first.unlock();

    // Still referenced: every other block must go elsewhere.
    touch(&c, 2);
    touch(&c, 3);
    let second = c.get(DEV, 1).unwrap();
    assert_eq!(second.slot(), slot);
    assert_eq!(c.references(slot), 2);
    c.release(second);

    first.lock();
    c.release(first);
    assert_eq!(c.references(slot), 0);
    assert_eq!(c.block_of(slot), Some(id(1)));
}

#[test]
fn evicts_least_recently_released() {
    let c = cache(2, 2);
    touch(&c, 10);
    touch(&c, 11);
    let before = c.stats();

    // 10 was released first, so 12 takes its slot.
    touch(&c, 12);
    let after = c.stats();
    assert_eq!(after.evictions, before.evictions + 1);

    touch(&c, 11);
    assert_eq!(c.stats().hits, after.hits + 1);
    touch(&c, 10);
    assert_eq!(c.stats().misses, after.misses + 1);
    assert_eq!(c.disk().reads(), 4);
}

#[test]
fn eviction_skips_referenced_slots() {
    let c = cache(2, 1);
    let held = c.read(DEV, 1).unwrap();
    c.clock().tick();
    touch(&c, 2);

    // Block 1 is older but held; block 2 is the only candidate.
    let b = c.read(DEV, 3).unwrap();
    assert_ne!(b.slot(), held.slot());
    c.release(b);
    c.release(held);
}

#[test]
fn exhaustion_is_reported_and_recoverable() {
    let c = cache(3, 2);
    let mut held: Vec<_> = (0..3).map(|n| c.get(DEV, n).unwrap()).collect();

    assert_eq!(c.get(DEV, 99).unwrap_err(), BioError::NoFreeBuffers);
    // A cached block is still served.
    held[0].unlock();
    let again = c.get(DEV, 0).unwrap();
    c.release(again);
    held[0].lock();

    let first = held.remove(0);
    c.release(first);
    let b = c.get(DEV, 99).unwrap();
    assert_eq!(b.id(), id(99));
    c.release(b);
    for b in held {
        c.release(b);
    }
}

#[test]
fn write_then_evict_then_read_round_trips() {
    let c = cache(1, 1);
    let mut b = c.read(DEV, 5).unwrap();
    for (i, x) in b.data_mut().iter_mut().enumerate() {
        *x = u8::try_from(i % 251).unwrap();
    }
    c.write(&b).unwrap();
    c.release(b);

    // The only slot now holds block 6.
    touch(&c, 6);

    let b = c.read(DEV, 5).unwrap();
    assert!(
        b.data()
            .iter()
            .enumerate()
            .all(|(i, &x)| usize::from(x) == i % 251)
    );
    c.release(b);
    assert_eq!(c.disk().writes(), 1);
    assert_eq!(c.disk().reads(), 3);
    assert_eq!(c.stats().evictions, 2);
}

#[test]
fn read_error_returns_the_buffer() {
    let c = cache(1, 1);
    c.disk().break_block(id(4));
    assert_eq!(
        c.read(DEV, 4).unwrap_err(),
        BioError::Io(DiskError::Failed(id(4)))
    );

    // The slot was released and its contents are not trusted.
    let b = c.get(DEV, 4).unwrap();
    assert!(!b.is_valid());
    c.release(b);
    touch(&c, 8);
}

#[test]
fn write_error_is_reported() {
    let c = cache(1, 1);
    let b = c.get(DEV, 4).unwrap();
    c.disk().break_block(id(4));
    assert_eq!(c.write(&b), Err(BioError::Io(DiskError::Failed(id(4)))));
    c.release(b);
}

#[test]
fn pinned_block_survives_release() {
    let c = cache(1, 1);
    let b = c.read(DEV, 1).unwrap();
    let slot = c.pin(&b);
    c.release(b);
    assert_eq!(c.references(slot), 1);

    assert_eq!(c.get(DEV, 2).unwrap_err(), BioError::NoFreeBuffers);
    // A pinned block is still a hit.
    touch(&c, 1);
    assert_eq!(c.disk().reads(), 1);

    c.unpin(slot);
    assert_eq!(c.references(slot), 0);
    touch(&c, 2);
    assert_eq!(c.block_of(slot), Some(id(2)));
}

/// Release block 1 at tick 1, then leave block 2 pinned and locked on the
/// other slot with the clock at 2.
fn pinned_second_block(c: &Cache) -> (Buf<'_>, SlotId) {
    touch(c, 1);
    let b = c.read(DEV, 2).unwrap();
    let slot = c.pin(&b);
    c.clock().tick();
    (b, slot)
}

#[test]
fn unpin_stamps_the_slot_it_frees() {
    let c = cache(2, 1);
    let (b, slot) = pinned_second_block(&c);
    c.release(b);
    c.clock().tick();
    c.unpin(slot);

    // Block 1 was released before block 2 became unused.
    touch(&c, 3);
    assert_eq!(c.block_of(slot), Some(id(2)));
}

#[test]
fn release_racing_unpin_stamps_the_slot() {
    for _ in 0..200 {
        let c = cache(2, 1);
        let (b, slot) = pinned_second_block(&c);
        let go = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                go.wait();
                c.unpin(slot);
            });
            go.wait();
            c.release(b);
        });

        assert_eq!(c.references(slot), 0);
        touch(&c, 3);
        assert_eq!(c.block_of(slot), Some(id(2)));
    }
}

#[test]
fn dropping_a_handle_returns_its_reference() {
    let c = cache(1, 1);
    let mut b = c.get(DEV, 1).unwrap();
    let slot = b.slot();
    drop(b);
    assert_eq!(c.references(slot), 0);

    b = c.get(DEV, 2).unwrap();
    b.unlock();
    drop(b);
    assert_eq!(c.references(slot), 0);
    touch(&c, 3);
}

#[test]
#[should_panic(expected = "bwrite")]
fn write_without_lock_panics() {
    let c = cache(1, 1);
    let mut b = c.get(DEV, 1).unwrap();
    b.unlock();
    let _ = c.write(&b);
}

#[test]
#[should_panic(expected = "brelse")]
fn release_without_lock_panics() {
    let c = cache(1, 1);
    let mut b = c.get(DEV, 1).unwrap();
    b.unlock();
    c.release(b);
}

#[test]
#[should_panic(expected = "bunpin")]
fn unpin_without_reference_panics() {
    let c = cache(1, 1);
    let b = c.get(DEV, 1).unwrap();
    let slot = c.pin(&b);
    c.release(b);
    c.unpin(slot);
    c.unpin(slot);
}

#[test]
#[should_panic(expected = "another cache")]
fn foreign_buffer_panics() {
    let a = cache(1, 1);
    let b = cache(1, 1);
    let buf = a.get(DEV, 1).unwrap();
    b.release(buf);
}

#[test]
#[should_panic(expected = "unlocked")]
fn data_needs_the_lock() {
    let c = cache(1, 1);
    let mut b = c.get(DEV, 1).unwrap();
    b.unlock();
    let _ = b.data()[0];
}

#[test]
fn concurrent_increments_are_not_lost() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 300;
    const BLOCKS: u32 = 12;
    let c = Arc::new(cache(10, 5));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let (c, barrier) = (Arc::clone(&c), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                for r in 0..ROUNDS {
                    let blockno = u32::try_from((t * 7 + r * 3) % BLOCKS as usize).unwrap();
                    let mut b = c.read(DEV, blockno).unwrap();
                    let n = u64::from_le_bytes(b.data()[..8].try_into().unwrap());
                    b.data_mut()[..8].copy_from_slice(&(n + 1).to_le_bytes());
                    c.write(&b).unwrap();
                    c.release(b);
                    if r % 16 == 0 {
                        c.clock().tick();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total: u64 = (0..BLOCKS)
        .filter_map(|n| c.disk().block(id(n)))
        .map(|b| u64::from_le_bytes(b[..8].try_into().unwrap()))
        .sum();
    assert_eq!(total, (THREADS * ROUNDS) as u64);
    let s = c.stats();
    assert_eq!(s.hits + s.misses, (THREADS * ROUNDS) as u64);
}

#[test]
fn same_block_from_many_threads_uses_one_slot() {
    const THREADS: usize = 6;
    let c = Arc::new(cache(THREADS, 3));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (c, barrier) = (Arc::clone(&c), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                let b = c.read(DEV, 42).unwrap();
                let slot = b.slot();
                thread::yield_now();
                c.release(b);
                slot
            })
        })
        .collect();
    let slots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(slots.iter().all(|&s| s == slots[0]));
    assert_eq!(c.disk().reads(), 1);
}

#[test]
fn config_reports_the_geometry() {
    let c = cache(4, 3);
    assert_eq!(
        c.config(),
        &BioConfig::default().with_buffers(4).with_buckets(3)
    );
}
