use binrw::{io::Cursor, BinRead};

use super::BOOT_SIGNATURE;
use crate::UmsFsResult;

/// DOS 2.0 BIOS Parameter Block, used by FAT12.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct Dos20Bpb {
    /// Logical sector size in bytes.
    pub sector_size: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_dir_entries: u16,
    pub total_sectors: u16,
    pub media_desc: u8,
    pub sectors_per_fat: u16,
}

/// DOS 3.31 BIOS Parameter Block, used by FAT12, FAT16 and FAT16B.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct Dos331Bpb {
    pub dos_2_0: Dos20Bpb,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub hidden_sectors: u32,
    /// Large total logical sectors.
    pub total_sectors: u32,
}

/// DOS 7.1 Extended BIOS Parameter Block (full variant), used by FAT32.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct Dos71Ebpb {
    pub dos_3_31: Dos331Bpb,
    pub sectors_per_fat: u32,
    pub mirroring_flags: u16,
    pub version: u16,
    pub root_dir_cluster: u32,
    pub fsinfo_sector: u16,
    pub backup_sector: u16,
    pub boot_filename: [u8; 0xC],
    pub pdrv: u8,
    pub flags: u8,
    /// Extended boot signature (0x29).
    pub ext_boot_sig: u8,
    pub vol_serial_num: u32,
    pub vol_label: [u8; 0xB],
    /// Filesystem type string, space padded. `"FAT32   "` on a FAT32 VBR.
    pub fs_type: [u8; 0x8],
}

/// Volume Boot Record: the first sector of every FAT and NTFS volume. Drives
/// formatted with a Super Floppy Drive (SFD) layout carry one directly at
/// LBA 0 instead of a partition table.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct VolumeBootRecord {
    /// Jump boot code; `\xEB\x76\x90` on an exFAT VBR.
    pub jmp_boot: [u8; 0x3],
    /// OEM name, space padded. `"EXFAT   "` / `"NTFS    "` for those VBRs.
    pub oem_name: [u8; 0x8],
    pub ebpb: Dos71Ebpb,
    pub boot_code: [u8; 0x1A3],
    pub pdrv: u8,
    /// Matches [`BOOT_SIGNATURE`] for FAT32, exFAT and NTFS.
    pub boot_sig: u16,
}

/// Classification outcome for a candidate boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbrClass {
    /// FAT12/FAT16/FAT32/exFAT.
    Fat,
    Ntfs,
    /// Valid boot signature but no recognizable volume layout; the sector
    /// may be a nested MBR/EBR rather than a VBR.
    Unsupported,
    Invalid,
}

impl VolumeBootRecord {
    pub fn parse(block: &[u8]) -> UmsFsResult<Self> {
        Ok(Self::read(&mut Cursor::new(block))?)
    }

    /// Classifies this sector, trying the unambiguous markers (exFAT jump
    /// sequence, NTFS OEM name, FAT32 type string) before falling back to a
    /// BPB geometry heuristic for FAT volumes formatted by old tools, which
    /// carry neither a boot signature nor a type string.
    pub fn classify(&self, block_length: u32) -> VbrClass {
        let signed = self.boot_sig == BOOT_SIGNATURE;

        if signed {
            if self.jmp_boot == [0xEB, 0x76, 0x90] && &self.oem_name == b"EXFAT   " {
                return VbrClass::Fat;
            }

            if &self.oem_name == b"NTFS    " {
                return VbrClass::Ntfs;
            }
        }

        // 0xEB (short jump), 0xE9 (near jump) or 0xE8 (near call)
        if matches!(self.jmp_boot[0], 0xEB | 0xE9 | 0xE8) {
            if signed && &self.ebpb.fs_type == b"FAT32   " {
                return VbrClass::Fat;
            }

            // Note: the total-sector figures are deliberately not
            // cross-checked against the partition's block count, matching
            // what FAT formatters actually produce in the wild.
            let bpb = &self.ebpb.dos_3_31.dos_2_0;
            if bpb.sector_size.is_power_of_two()
                && u32::from(bpb.sector_size) <= block_length
                && bpb.sectors_per_cluster.is_power_of_two()
                && bpb.reserved_sectors != 0
                && (1..=2).contains(&bpb.num_fats)
                && bpb.root_dir_entries != 0
                && (bpb.total_sectors >= 128 || self.ebpb.dos_3_31.total_sectors >= 0x10000)
                && bpb.sectors_per_fat != 0
            {
                return VbrClass::Fat;
            }
        }

        // A signed sector we couldn't identify may still be an MBR or EBR;
        // report it as such so the caller can fall back to table parsing.
        if signed {
            VbrClass::Unsupported
        } else {
            VbrClass::Invalid
        }
    }
}
