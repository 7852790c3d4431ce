use binrw::{io::Cursor, BinRead};

use super::BOOT_SIGNATURE;
use crate::UmsFsResult;

pub const MBR_PARTITION_COUNT: usize = 4;

/// Partition entry classes the mount path distinguishes. Only LBA-capable
/// type codes are recognized; CHS-only and hidden variants are left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Empty,
    /// FAT12/16/32, NTFS or exFAT; inspecting the VBR decides which.
    FatNtfs,
    /// Linux native partition; probe for an EXT superblock.
    Linux,
    /// Start of an EBR chain.
    Extended,
    /// Protective entry announcing a GPT.
    GptProtective,
    Unknown,
}

impl PartitionKind {
    pub fn of(type_byte: u8) -> Self {
        match type_byte {
            0x00 => PartitionKind::Empty,
            // FAT12, FAT16, FAT16B, NTFS/exFAT, FAT32 CHS, FAT32 LBA,
            // FAT16B LBA
            0x01 | 0x04 | 0x06 | 0x07 | 0x0B | 0x0C | 0x0E => PartitionKind::FatNtfs,
            0x83 => PartitionKind::Linux,
            // EBR CHS, EBR LBA, EBR Linux
            0x05 | 0x0F | 0x85 => PartitionKind::Extended,
            0xEE => PartitionKind::GptProtective,
            _ => PartitionKind::Unknown,
        }
    }
}

/// 16-byte partition entry shared by MBRs and EBRs.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct MbrPartitionEntry {
    pub status: u8,
    /// CHS address of the first block; unused nowadays.
    pub chs_start: [u8; 0x3],
    pub part_type: u8,
    pub chs_end: [u8; 0x3],
    pub lba: u32,
    pub block_count: u32,
}

impl MbrPartitionEntry {
    pub fn kind(&self) -> PartitionKind {
        PartitionKind::of(self.part_type)
    }
}

/// Master Boot Record at LBA 0 (unless the drive uses an SFD layout).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct MasterBootRecord {
    pub code_area: [u8; 0x1BE],
    pub partitions: [MbrPartitionEntry; MBR_PARTITION_COUNT],
    pub boot_sig: u16,
}

impl MasterBootRecord {
    pub fn parse(block: &[u8]) -> UmsFsResult<Self> {
        Ok(Self::read(&mut Cursor::new(block))?)
    }
}

/// Extended Boot Record: one real partition entry plus a link to the next
/// EBR, forming a singly linked chain for more than 4 partitions.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct ExtendedBootRecord {
    pub code_area: [u8; 0x1BE],
    pub partition: MbrPartitionEntry,
    /// Next EBR in the chain; its LBA is relative to the first EBR.
    pub next_ebr: MbrPartitionEntry,
    pub reserved: [u8; 0x20],
    pub boot_sig: u16,
}

impl ExtendedBootRecord {
    pub fn parse(block: &[u8]) -> UmsFsResult<Self> {
        Ok(Self::read(&mut Cursor::new(block))?)
    }

    pub fn is_signed(&self) -> bool {
        self.boot_sig == BOOT_SIGNATURE
    }
}
