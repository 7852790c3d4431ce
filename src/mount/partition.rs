//! Partition table traversal: SFD detection, MBR entries, EBR chains and
//! GUID partition tables.

use alloc::vec::Vec;

use log::{debug, warn};

use super::MountTask;
use crate::{
    drivers::FilesystemType,
    layout::{
        gpt::{
            GptHeader, GptPartitionEntry, GPT_ENTRY_SIZE, GPT_MAX_ENTRIES,
            LINUX_FILESYSTEM_DATA_GUID, MICROSOFT_BASIC_DATA_GUID,
        },
        mbr::{ExtendedBootRecord, MasterBootRecord, PartitionKind},
        vbr::VbrClass,
    },
};

/// EBR chains longer than this are abandoned; a link count anywhere near it
/// only occurs on corrupted or self-referencing chains.
const EBR_CHAIN_LIMIT: u32 = 256;

impl MountTask<'_> {
    /// Runs the full detection pass. Returns whether at least one volume
    /// was mounted.
    pub(super) fn run(&mut self) -> bool {
        // Drives without a partition table (SFD layout) carry a VBR right
        // at LBA 0; a boot-signed sector that is no VBR is in all
        // likelihood an MBR.
        match self.inspect_vbr(0) {
            VbrClass::Fat => self.register_volume(0, self.lun.block_count(), FilesystemType::Fat),
            VbrClass::Ntfs => self.register_volume(0, self.lun.block_count(), FilesystemType::Ntfs),
            VbrClass::Unsupported => self.parse_mbr(),
            VbrClass::Invalid => {
                if self.inspect_ext_superblock(0) {
                    self.register_volume(0, self.lun.block_count(), FilesystemType::Ext);
                } else {
                    warn!(
                        "interface {} LUN {}: no valid boot sector",
                        self.lun.usb_if_id(),
                        self.lun.lun()
                    );
                }
            }
        }

        self.lun.filesystem_count() > 0
    }

    /// Walks the MBR currently sitting in the scratch block.
    fn parse_mbr(&mut self) {
        let mbr = match MasterBootRecord::parse(&self.block) {
            Ok(mbr) => mbr,
            Err(err) => {
                warn!("undecodable MBR: {err}");
                return;
            }
        };

        // Decode all four entries up front; inspecting a candidate volume
        // reuses the scratch block that held the MBR.
        for entry in &mbr.partitions {
            self.parse_partition_entry(
                entry.part_type,
                u64::from(entry.lba),
                u64::from(entry.block_count),
                true,
            );
        }
    }

    /// Dispatches one partition entry by its type byte. `allow_nested`
    /// permits descending into EBR chains and GPTs, which only the
    /// top-level MBR may announce.
    fn parse_partition_entry(
        &mut self,
        part_type: u8,
        lba: u64,
        block_count: u64,
        allow_nested: bool,
    ) {
        match PartitionKind::of(part_type) {
            PartitionKind::Empty => {}
            PartitionKind::FatNtfs => {
                if block_count == 0 {
                    return;
                }
                match self.inspect_vbr(lba) {
                    VbrClass::Fat => self.register_volume(lba, block_count, FilesystemType::Fat),
                    VbrClass::Ntfs => self.register_volume(lba, block_count, FilesystemType::Ntfs),
                    VbrClass::Unsupported | VbrClass::Invalid => {
                        debug!("partition at LBA {lba:#x} has no usable VBR");
                    }
                }
            }
            PartitionKind::Linux => {
                if block_count != 0 && self.inspect_ext_superblock(lba) {
                    self.register_volume(lba, block_count, FilesystemType::Ext);
                } else {
                    debug!("partition at LBA {lba:#x} has no EXT superblock");
                }
            }
            PartitionKind::Extended => {
                if allow_nested {
                    self.parse_ebr(lba);
                }
            }
            PartitionKind::GptProtective => {
                if allow_nested {
                    self.parse_gpt(lba);
                }
            }
            PartitionKind::Unknown => {
                debug!("skipping partition type {part_type:#04x} at LBA {lba:#x}");
            }
        }
    }

    /// Follows an EBR chain. Next-EBR links are relative to the first EBR;
    /// each EBR's partition entry is relative to that EBR's own sector.
    fn parse_ebr(&mut self, first_ebr_lba: u64) {
        let mut next_rel = 0u64;

        for _ in 0..EBR_CHAIN_LIMIT {
            let ebr_lba = first_ebr_lba + next_rel;
            if let Err(err) = self.read_block(ebr_lba) {
                warn!("EBR read at LBA {ebr_lba:#x} failed: {err}");
                return;
            }

            let ebr = match ExtendedBootRecord::parse(&self.block) {
                Ok(ebr) => ebr,
                Err(err) => {
                    warn!("undecodable EBR at LBA {ebr_lba:#x}: {err}");
                    return;
                }
            };
            if !ebr.is_signed() {
                debug!("unsigned EBR at LBA {ebr_lba:#x} terminates the chain");
                return;
            }

            let part_lba = ebr_lba + u64::from(ebr.partition.lba);
            self.parse_partition_entry(
                ebr.partition.part_type,
                part_lba,
                u64::from(ebr.partition.block_count),
                false,
            );

            next_rel = u64::from(ebr.next_ebr.lba);
            if next_rel == 0 {
                return;
            }
        }

        warn!("EBR chain at LBA {first_ebr_lba:#x} exceeds {EBR_CHAIN_LIMIT} links");
    }

    /// Parses the GPT whose primary header the protective MBR entry points
    /// at, falling back to the backup header when the primary is damaged.
    fn parse_gpt(&mut self, gpt_lba: u64) {
        let Some(header) = self.locate_gpt_header(gpt_lba) else {
            warn!("no usable GPT header");
            return;
        };

        if header.partition_array_entry_size != GPT_ENTRY_SIZE {
            warn!(
                "unsupported GPT entry size {:#x}",
                header.partition_array_entry_size
            );
            return;
        }

        let entry_count = header.partition_array_count.min(GPT_MAX_ENTRIES);
        let entries_per_block = self.lun.block_length() / GPT_ENTRY_SIZE;
        if entry_count == 0 || entries_per_block == 0 {
            return;
        }

        // Decode the whole array before inspecting any volume; the VBR and
        // superblock probes recycle the scratch block.
        let array_blocks = entry_count / entries_per_block;
        let mut entries = Vec::new();
        'blocks: for block_idx in 0..array_blocks {
            let lba = header.partition_array_lba + u64::from(block_idx);
            if let Err(err) = self.read_block(lba) {
                warn!("GPT array read at LBA {lba:#x} failed: {err}");
                break;
            }

            for entry_idx in 0..entries_per_block {
                if block_idx * entries_per_block + entry_idx >= entry_count {
                    break 'blocks;
                }
                let offset = (entry_idx * GPT_ENTRY_SIZE) as usize;
                let raw = &self.block[offset..offset + GPT_ENTRY_SIZE as usize];
                if let Ok(entry) = GptPartitionEntry::parse(raw) {
                    entries.push(entry);
                }
            }
        }

        for entry in entries {
            self.parse_gpt_entry(&entry);
        }
    }

    /// Validates a GPT header sector at `lba`. A missing signature abandons
    /// GPT parsing outright; only a checksum mismatch follows the backup
    /// link, once, and the backup LBA is rejected when it is zero,
    /// self-referential or beyond the device.
    fn locate_gpt_header(&mut self, lba: u64) -> Option<GptHeader> {
        let mut lba = lba;
        let mut tried_backup = false;

        loop {
            if let Err(err) = self.read_block(lba) {
                warn!("GPT header read at LBA {lba:#x} failed: {err}");
                return None;
            }
            let header = GptHeader::parse(&self.block).ok()?;
            if !header.has_valid_signature() {
                warn!("no GPT header signature at LBA {lba:#x}");
                return None;
            }
            if header.verify_crc32(&self.block) {
                return Some(header);
            }
            if tried_backup {
                return None;
            }

            let backup = header.backup_header_lba;
            if backup == 0 || backup == header.cur_header_lba || backup >= self.lun.block_count() {
                return None;
            }
            debug!("GPT header checksum mismatch at LBA {lba:#x}, trying backup at {backup:#x}");
            lba = backup;
            tried_backup = true;
        }
    }

    fn parse_gpt_entry(&mut self, entry: &GptPartitionEntry) {
        let lba = entry.lba_start;
        let block_count = entry.block_count();
        if block_count == 0 {
            return;
        }

        if entry.type_guid == MICROSOFT_BASIC_DATA_GUID {
            match self.inspect_vbr(lba) {
                VbrClass::Fat => self.register_volume(lba, block_count, FilesystemType::Fat),
                VbrClass::Ntfs => self.register_volume(lba, block_count, FilesystemType::Ntfs),
                // Basic Data is also what Windows tools assign to volumes
                // they merely initialized; a blank one may still hold a
                // foreign filesystem.
                VbrClass::Invalid => {
                    if self.inspect_ext_superblock(lba) {
                        self.register_volume(lba, block_count, FilesystemType::Ext);
                    }
                }
                VbrClass::Unsupported => {
                    debug!("GPT basic data partition at LBA {lba:#x} has no usable VBR");
                }
            }
        } else if entry.type_guid == LINUX_FILESYSTEM_DATA_GUID {
            if self.inspect_ext_superblock(lba) {
                self.register_volume(lba, block_count, FilesystemType::Ext);
            } else {
                debug!("GPT Linux partition at LBA {lba:#x} has no EXT superblock");
            }
        }
    }
}
