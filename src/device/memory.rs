//! A block device backed by a byte array in memory.

use alloc::{sync::Arc, vec::Vec};

use super::BlockReader;
use crate::{UmsFsError, UmsFsResult};

/// A block device backed by a byte array in memory. Mostly useful for tests
/// and for mounting disk images on a host.
#[derive(Debug)]
pub struct MemoryBlockDevice {
    block_length: u32,
    data: Vec<u8>,
}

impl MemoryBlockDevice {
    pub fn new(block_length: u32, data: Vec<u8>) -> UmsFsResult<Arc<Self>> {
        if block_length == 0 {
            return Err(UmsFsError::UnsupportedBlockLength(block_length));
        }
        Ok(Arc::new(Self { block_length, data }))
    }

    pub fn block_length(&self) -> u32 {
        self.block_length
    }

    pub fn block_count(&self) -> u64 {
        self.data.len() as u64 / u64::from(self.block_length)
    }
}

impl BlockReader for MemoryBlockDevice {
    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> UmsFsResult<()> {
        let src = lba
            .checked_mul(u64::from(self.block_length))
            .and_then(|start| usize::try_from(start).ok())
            .and_then(|start| Some((start, start.checked_add(buf.len())?)))
            .and_then(|(start, end)| self.data.get(start..end));

        match src {
            Some(src) => {
                buf.copy_from_slice(src);
                Ok(())
            }
            None => Err(UmsFsError::BlockReadOutOfRange {
                lba,
                count: (buf.len() / self.block_length as usize) as u64,
                capacity: self.block_count(),
            }),
        }
    }
}
