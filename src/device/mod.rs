//! Access seam to the underlying mass-storage transport.

use alloc::{sync::Arc, vec::Vec};

use crate::{mount::FilesystemContext, UmsFsError, UmsFsResult};

mod memory;
mod partition;

pub use self::{memory::MemoryBlockDevice, partition::PartitionDevice};

/// Synchronous block-granular read access to one logical unit, provided by
/// the transport layer (SCSI over USB in the original deployment).
///
/// `buf` must span a whole number of logical blocks; implementations read
/// `buf.len() / block_length` blocks starting at `lba`.
pub trait BlockReader: Send + Sync {
    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> UmsFsResult<()>;
}

impl<R: ?Sized + BlockReader> BlockReader for Arc<R> {
    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> UmsFsResult<()> {
        (**self).read_blocks(lba, buf)
    }
}

/// One USB mass-storage logical unit together with the filesystem contexts
/// mounted from it. Created when the transport claims an interface and torn
/// down on removal; it exclusively owns its context list.
pub struct LogicalUnitContext {
    usb_if_id: i32,
    lun: u8,
    block_length: u32,
    block_count: u64,
    write_protect: bool,
    reader: Arc<dyn BlockReader>,
    pub(crate) fs_contexts: Vec<FilesystemContext>,
}

impl LogicalUnitContext {
    /// Rejects a zero block length; every block-address computation in the
    /// crate divides or multiplies by it.
    pub fn new(
        usb_if_id: i32,
        lun: u8,
        block_length: u32,
        block_count: u64,
        write_protect: bool,
        reader: Arc<dyn BlockReader>,
    ) -> UmsFsResult<Self> {
        if block_length == 0 {
            return Err(UmsFsError::UnsupportedBlockLength(block_length));
        }

        Ok(Self {
            usb_if_id,
            lun,
            block_length,
            block_count,
            write_protect,
            reader,
            fs_contexts: Vec::new(),
        })
    }

    pub fn usb_if_id(&self) -> i32 {
        self.usb_if_id
    }

    pub fn lun(&self) -> u8 {
        self.lun
    }

    /// Logical block size in bytes.
    pub fn block_length(&self) -> u32 {
        self.block_length
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn write_protect(&self) -> bool {
        self.write_protect
    }

    /// Mounted volumes, in creation order.
    pub fn filesystem_contexts(&self) -> &[FilesystemContext] {
        &self.fs_contexts
    }

    pub fn filesystem_count(&self) -> u32 {
        self.fs_contexts.len() as u32
    }

    /// Bounds-checked read of `buf.len() / block_length` blocks at `lba`.
    pub(crate) fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> UmsFsResult<()> {
        let count = (buf.len() / self.block_length as usize) as u64;
        if lba.checked_add(count).map_or(true, |end| end > self.block_count) {
            return Err(UmsFsError::BlockReadOutOfRange {
                lba,
                count,
                capacity: self.block_count,
            });
        }
        self.reader.read_blocks(lba, buf)
    }

    /// A view of `block_count` blocks starting at `base_lba`, for handing a
    /// partition to a filesystem driver.
    pub fn partition_device(&self, base_lba: u64, block_count: u64) -> UmsFsResult<PartitionDevice> {
        PartitionDevice::split_from(
            Arc::clone(&self.reader),
            self.block_length,
            self.block_count,
            base_lba,
            block_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{LogicalUnitContext, MemoryBlockDevice};
    use crate::UmsFsError;

    #[test]
    fn zero_block_length_is_rejected() {
        let reader = MemoryBlockDevice::new(8, vec![0u8; 32]).expect("device");
        assert!(matches!(
            LogicalUnitContext::new(0, 0, 0, 4, false, reader),
            Err(UmsFsError::UnsupportedBlockLength(0))
        ));
    }
}
