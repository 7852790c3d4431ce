use binrw::{io::Cursor, BinRead};

use crate::{utils::crc32c, UmsFsResult};

/// Byte offset of the superblock from the start of an EXT volume.
pub const EXT_SUPERBLOCK_OFFSET: u32 = 1024;
/// On-disk size of the superblock.
pub const EXT_SUPERBLOCK_SIZE: u32 = 1024;

pub const EXT_MAGIC: u16 = 0xEF53;

/// `feature_ro_compat` bit announcing checksummed metadata.
const RO_COMPAT_METADATA_CSUM: u32 = 0x0400;
const CSUM_TYPE_CRC32C: u8 = 1;
/// Byte offset of the `checksum` field within the superblock.
const CHECKSUM_OFFSET: usize = 0x3FC;

/// EXT2/3/4 superblock. Fields past `feature_ro_compat` are folded into
/// reserved ranges except the two the checksum verification needs.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct ExtSuperblock {
    pub inodes_count: u32,
    pub blocks_count_lo: u32,
    pub r_blocks_count_lo: u32,
    pub free_blocks_count_lo: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    /// Block size is `1024 << log_block_size`.
    pub log_block_size: u32,
    pub log_cluster_size: u32,
    pub blocks_per_group: u32,
    pub clusters_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub reserved0: [u8; 0x10D],
    pub checksum_type: u8,
    pub reserved1: [u8; 0x286],
    /// crc32c over the preceding superblock bytes, all-ones seed.
    pub checksum: u32,
}

impl ExtSuperblock {
    pub fn parse(raw: &[u8]) -> UmsFsResult<Self> {
        Ok(Self::read(&mut Cursor::new(raw))?)
    }

    /// Structural consistency check in the spirit of the EXT driver's own
    /// superblock verification: magic, nonzero geometry and, when the
    /// metadata checksum feature is active, the crc32c over `raw`.
    pub fn is_valid(&self, raw: &[u8]) -> bool {
        if self.magic != EXT_MAGIC {
            return false;
        }

        if self.inodes_count == 0
            || self.blocks_count_lo == 0
            || self.blocks_per_group == 0
            || self.inodes_per_group == 0
        {
            return false;
        }

        if self.log_block_size > 6 {
            return false;
        }

        // only 1 KiB block filesystems put their first data block at 1
        let expected_first = u32::from(self.log_block_size == 0);
        if self.first_data_block != expected_first {
            return false;
        }

        if self.rev_level > 0 && self.inode_size < 128 {
            return false;
        }

        if self.feature_ro_compat & RO_COMPAT_METADATA_CSUM != 0 {
            return self.checksum_type == CSUM_TYPE_CRC32C && self.verify_checksum(raw);
        }

        true
    }

    pub fn block_size(&self) -> u32 {
        1024 << self.log_block_size
    }

    fn verify_checksum(&self, raw: &[u8]) -> bool {
        if raw.len() < EXT_SUPERBLOCK_SIZE as usize {
            return false;
        }
        crc32c(!0, &raw[..CHECKSUM_OFFSET]) == self.checksum
    }
}
