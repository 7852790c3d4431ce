//! Sector-level probes shared by the SFD, MBR, EBR and GPT paths.

use log::warn;

use super::MountTask;
use crate::{
    layout::{
        ext::{ExtSuperblock, EXT_SUPERBLOCK_OFFSET, EXT_SUPERBLOCK_SIZE},
        vbr::{VbrClass, VolumeBootRecord},
    },
    UmsFsResult,
};

impl MountTask<'_> {
    /// Reads one device block into the scratch buffer.
    pub(super) fn read_block(&mut self, lba: u64) -> UmsFsResult<()> {
        self.lun.read_blocks(lba, &mut self.block)
    }

    /// Reads and classifies the candidate boot sector at `lba`. The sector
    /// stays in the scratch buffer so a following mount can hand it to the
    /// driver without a second read. Read failures classify as `Invalid`.
    pub(super) fn inspect_vbr(&mut self, lba: u64) -> VbrClass {
        if let Err(err) = self.read_block(lba) {
            warn!("boot sector read at LBA {lba:#x} failed: {err}");
            return VbrClass::Invalid;
        }

        match VolumeBootRecord::parse(&self.block) {
            Ok(vbr) => vbr.classify(self.lun.block_length()),
            Err(err) => {
                warn!("boot sector at LBA {lba:#x} is undecodable: {err}");
                VbrClass::Invalid
            }
        }
    }

    /// Probes for an EXT superblock 1 KiB into the volume starting at
    /// `lba`. Reads into a separate buffer, so the scratch block is left
    /// untouched.
    pub(super) fn inspect_ext_superblock(&mut self, lba: u64) -> bool {
        let block_length = u64::from(self.lun.block_length());

        // For blocks of up to 1 KiB the superblock starts on its own block
        // boundary; for larger blocks it sits inside the first block.
        let read_lba = lba + u64::from(EXT_SUPERBLOCK_OFFSET) / block_length;
        let read_blocks = (u64::from(EXT_SUPERBLOCK_SIZE) / block_length).max(1);
        let in_block_offset = if read_lba == lba {
            EXT_SUPERBLOCK_OFFSET as usize
        } else {
            0
        };

        let mut buf = alloc::vec![0u8; (read_blocks * block_length) as usize];
        if self.lun.read_blocks(read_lba, &mut buf).is_err() {
            return false;
        }

        let raw = &buf[in_block_offset..in_block_offset + EXT_SUPERBLOCK_SIZE as usize];
        match ExtSuperblock::parse(raw) {
            Ok(superblock) => superblock.is_valid(raw),
            Err(_) => false,
        }
    }
}
