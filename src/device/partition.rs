use alloc::sync::Arc;
use core::fmt;

use super::BlockReader;
use crate::{UmsFsError, UmsFsResult};

/// A block-granular view of one partition on a logical unit. Handed to
/// filesystem drivers so their reads stay relative to the partition start
/// and cannot escape its LBA range.
#[derive(Clone)]
pub struct PartitionDevice {
    reader: Arc<dyn BlockReader>,
    block_length: u32,
    base_lba: u64,
    block_count: u64,
}

impl PartitionDevice {
    pub(crate) fn split_from(
        reader: Arc<dyn BlockReader>,
        block_length: u32,
        parent_blocks: u64,
        base_lba: u64,
        block_count: u64,
    ) -> UmsFsResult<Self> {
        if base_lba
            .checked_add(block_count)
            .map_or(true, |end| end > parent_blocks)
        {
            return Err(UmsFsError::PartitionOutOfRange {
                base_lba,
                block_count,
                capacity: parent_blocks,
            });
        }

        Ok(Self {
            reader,
            block_length,
            base_lba,
            block_count,
        })
    }

    pub fn block_length(&self) -> u32 {
        self.block_length
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// First LBA of the partition on the underlying device.
    pub fn base_lba(&self) -> u64 {
        self.base_lba
    }

    /// Reads `buf.len() / block_length` blocks starting at the
    /// partition-relative address `lba`.
    pub fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> UmsFsResult<()> {
        let count = (buf.len() / self.block_length as usize) as u64;
        if lba.checked_add(count).map_or(true, |end| end > self.block_count) {
            return Err(UmsFsError::BlockReadOutOfRange {
                lba,
                count,
                capacity: self.block_count,
            });
        }
        self.reader.read_blocks(self.base_lba + lba, buf)
    }
}

impl fmt::Debug for PartitionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionDevice")
            .field("base_lba", &self.base_lba)
            .field("block_count", &self.block_count)
            .field("block_length", &self.block_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::MemoryBlockDevice;
    use crate::UmsFsError;

    #[test]
    fn reads_are_relative_to_the_partition_start() {
        let mut data = vec![0u8; 64];
        data[24] = 0xCC;
        let dev = MemoryBlockDevice::new(8, data).expect("device");
        let part = super::PartitionDevice::split_from(dev, 8, 8, 2, 4).expect("split");

        let mut buf = [0u8; 8];
        part.read_blocks(1, &mut buf).expect("read");
        assert_eq!(buf[0], 0xCC);
    }

    #[test]
    fn out_of_range_split_and_read_fail() {
        let dev = MemoryBlockDevice::new(8, vec![0u8; 64]).expect("device");
        assert!(matches!(
            super::PartitionDevice::split_from(dev.clone(), 8, 8, 6, 4),
            Err(UmsFsError::PartitionOutOfRange { base_lba: 6, block_count: 4, capacity: 8 })
        ));

        let part = super::PartitionDevice::split_from(dev, 8, 8, 2, 4).expect("split");
        let mut buf = [0u8; 16];
        assert!(part.read_blocks(3, &mut buf).is_err());
    }
}
