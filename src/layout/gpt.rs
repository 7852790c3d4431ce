use binrw::{io::Cursor, BinRead};

use crate::{utils::crc32, UmsFsResult};

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;
/// Used portion of the header block; the rest of the sector is reserved.
pub const GPT_HEADER_SIZE: u32 = 0x5C;
pub const GPT_ENTRY_SIZE: u32 = 0x80;
/// Headers claiming more entries than this are capped.
pub const GPT_MAX_ENTRIES: u32 = 128;

/// EBD0A0A2-B9E5-4433-87C0-68B6B72699C7.
pub const MICROSOFT_BASIC_DATA_GUID: [u8; 0x10] = [
    0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99,
    0xC7,
];

/// 0FC63DAF-8483-4772-8E79-3D69D8477DE4.
pub const LINUX_FILESYSTEM_DATA_GUID: [u8; 0x10] = [
    0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D,
    0xE4,
];

/// GUID Partition Table header, normally at LBA 1 with a backup copy in the
/// device's last block. Only the 92 used bytes are modeled; the remainder of
/// the block is reserved zeroes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct GptHeader {
    pub signature: [u8; 0x8],
    pub revision: u32,
    pub header_size: u32,
    /// CRC32 over the used header bytes, computed with this field zeroed.
    pub header_crc32: u32,
    pub reserved: [u8; 0x4],
    pub cur_header_lba: u64,
    pub backup_header_lba: u64,
    pub partition_lba_start: u64,
    pub partition_lba_end: u64,
    pub disk_guid: [u8; 0x10],
    pub partition_array_lba: u64,
    pub partition_array_count: u32,
    pub partition_array_entry_size: u32,
    pub partition_array_crc32: u32,
}

impl GptHeader {
    pub fn parse(block: &[u8]) -> UmsFsResult<Self> {
        Ok(Self::read(&mut Cursor::new(block))?)
    }

    /// Checks signature, revision and declared header size as a unit before
    /// anything else in the header is trusted.
    pub fn has_valid_signature(&self) -> bool {
        &self.signature == GPT_SIGNATURE
            && self.revision == GPT_REVISION
            && self.header_size == GPT_HEADER_SIZE
    }

    /// Recomputes the CRC32 over the raw header bytes with the checksum
    /// field zeroed and compares it against the recorded value.
    pub fn verify_crc32(&self, block: &[u8]) -> bool {
        let size = self.header_size as usize;
        if size != GPT_HEADER_SIZE as usize || block.len() < size {
            return false;
        }

        let mut bytes = [0u8; GPT_HEADER_SIZE as usize];
        bytes.copy_from_slice(&block[..size]);
        bytes[0x10..0x14].fill(0);
        crc32(&bytes) == self.header_crc32
    }
}

/// 128-byte GPT partition entry.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct GptPartitionEntry {
    pub type_guid: [u8; 0x10],
    pub unique_guid: [u8; 0x10],
    pub lba_start: u64,
    /// Last LBA, inclusive.
    pub lba_end: u64,
    pub flags: u64,
    /// Partition name, 36 UTF-16LE code units.
    pub name: [u16; 0x24],
}

impl GptPartitionEntry {
    pub fn parse(bytes: &[u8]) -> UmsFsResult<Self> {
        Ok(Self::read(&mut Cursor::new(bytes))?)
    }

    pub fn block_count(&self) -> u64 {
        self.lba_end
            .saturating_add(1)
            .saturating_sub(self.lba_start)
    }
}
