use core::fmt;
use kernel_info::param::BLOCK_SIZE;

/// Payload of one disk block.
pub type Block = [u8; BLOCK_SIZE];

/// Identity of a disk block: device number and block number on that device.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}

impl BlockId {
    #[inline]
    #[must_use]
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }

    /// Both halves in one word, so a slot's identity can be read atomically.
    #[inline]
    #[must_use]
    pub(crate) const fn pack(self) -> u64 {
        ((self.dev as u64) << 32) | self.blockno as u64
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn unpack(raw: u64) -> Self {
        Self::new((raw >> 32) as u32, raw as u32)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({}:{})", self.dev, self.blockno)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// Failure reported by a disk driver.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DiskError {
    #[error("no device {0}")]
    NoDevice(u32),
    #[error("block {0} is past the end of the device")]
    OutOfRange(BlockId),
    #[error("i/o error on block {0}")]
    Failed(BlockId),
}

/// The disk driver: synchronous transfer of whole blocks.
///
/// Both calls block the caller until the transfer completes. The cache only
/// calls them while holding the block's sleep lock, never a spin lock.
pub trait BlockDevice: Sync {
    /// Fill `buf` with the contents of `id`.
    ///
    /// # Errors
    /// The driver's failure, passed on to the cache's caller.
    fn read_block(&self, id: BlockId, buf: &mut Block) -> Result<(), DiskError>;

    /// Store `buf` as the contents of `id`.
    ///
    /// # Errors
    /// The driver's failure, passed on to the cache's caller.
    fn write_block(&self, id: BlockId, buf: &Block) -> Result<(), DiskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_keeps_both_halves() {
        let id = BlockId::new(0xdead_beef, 0x1234_5678);
        assert_eq!(id.pack(), 0xdead_beef_1234_5678);
        assert_eq!(BlockId::unpack(id.pack()), id);
        assert_eq!(format!("{id:?}"), "Block(3735928559:305419896)");
    }
}
