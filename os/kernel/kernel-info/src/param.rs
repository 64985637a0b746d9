//! # Kernel Parameters

/// Maximum number of CPUs; one free-page pool per CPU.
pub const NCPU: usize = 8;

/// Max number of blocks any single file-system operation writes.
pub const MAXOPBLOCKS: usize = 10;

/// Number of buffers in the block cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of independently locked buckets in the buffer cache index.
///
/// Prime, so that strided block numbers spread over the buckets.
pub const NBUCKET: usize = 13;

/// Size of a disk block in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Maximum number of pages moved from peer pools in one stealing pass.
pub const STEAL_BATCH: usize = 64;

/// Number of stealing passes before `allocate` reports out-of-memory.
pub const STEAL_ROUNDS: usize = 2;

const _: () = {
    assert!(NCPU > 0);
    assert!(NBUCKET > 0);
    assert!(NBUF >= NBUCKET);
    assert!(BLOCK_SIZE.is_power_of_two());
    assert!(STEAL_BATCH > 0 && STEAL_ROUNDS > 0);
};
