//! Volume detection, mounting and the virtual device table.
//!
//! [`MountManager`] owns the process-wide state: the per-family filesystem
//! drivers, the FAT volume slot table, the device-ID allocator and the table
//! of named virtual devices. Each logical unit brought up by the transport is
//! handed to [`MountManager::initialize_filesystems`], which walks its
//! partition structures and registers one `ums<N>` device per mounted volume.

use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};

use log::debug;

use crate::{
    device::LogicalUnitContext,
    drivers::{
        DeviceOps, DriverSet, ExtVolume, FatVolume, FilesystemType, MountFlags, NtfsVolume,
        FAT_VOLUME_SLOTS,
    },
    sync_impl::Mutex,
    UmsFsError, UmsFsResult,
};

mod inspect;
mod partition;
mod register;

/// Prefix of every generated virtual device name; the suffix is the
/// volume's device ID.
pub const MOUNT_NAME_PREFIX: &str = "ums";

/// Built-in device the default slot falls back to, registered at creation
/// and never removed.
pub const FALLBACK_DEVICE_NAME: &str = "sdmc";

/// Driver-owned handle for one mounted volume.
pub(crate) enum VolumeHandle {
    Fat {
        slot: u8,
        volume: Box<dyn FatVolume>,
    },
    Ntfs(Box<dyn NtfsVolume>),
    Ext(Box<dyn ExtVolume>),
}

impl VolumeHandle {
    fn fs_type(&self) -> FilesystemType {
        match self {
            VolumeHandle::Fat { .. } => FilesystemType::Fat,
            VolumeHandle::Ntfs(_) => FilesystemType::Ntfs,
            VolumeHandle::Ext(_) => FilesystemType::Ext,
        }
    }
}

/// One mounted volume: where it came from, how it was mounted and the
/// driver handle needed to unmount it again.
pub struct FilesystemContext {
    pub(crate) usb_if_id: i32,
    pub(crate) lun: u8,
    pub(crate) fs_idx: u32,
    pub(crate) flags: MountFlags,
    pub(crate) device_id: u32,
    pub(crate) name: String,
    pub(crate) cwd: String,
    pub(crate) handle: VolumeHandle,
}

impl FilesystemContext {
    pub fn fs_type(&self) -> FilesystemType {
        self.handle.fs_type()
    }

    /// ID the virtual device name is derived from; unique among mounted
    /// volumes and reused once freed.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Virtual device name, e.g. `ums0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mount_flags(&self) -> MountFlags {
        self.flags
    }

    /// Index of this volume within its logical unit, in detection order.
    pub fn fs_idx(&self) -> u32 {
        self.fs_idx
    }

    pub fn usb_if_id(&self) -> i32 {
        self.usb_if_id
    }

    pub fn lun(&self) -> u8 {
        self.lun
    }

    pub fn current_dir(&self) -> &str {
        &self.cwd
    }

    pub fn set_current_dir(&mut self, cwd: String) {
        self.cwd = cwd;
    }
}

struct VirtualDevice {
    name: String,
    /// `None` for built-in devices, which do not consume a device ID.
    device_id: Option<u32>,
    ops: Arc<dyn DeviceOps>,
}

/// Named device table plus the device-ID allocator. Entry 0 is always the
/// fallback device.
struct DeviceTable {
    entries: Vec<VirtualDevice>,
    default_idx: usize,
    device_ids: Vec<u32>,
}

impl DeviceTable {
    fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|dev| dev.name == name)
    }

    /// Smallest ID not currently allocated, so freed names are reused.
    fn smallest_free_id(&self) -> u32 {
        let mut id = 0;
        while self.device_ids.contains(&id) {
            id += 1;
        }
        id
    }
}

/// Built-in fallback backed by the console's SD card; its operations live
/// outside this crate.
struct SdCardOps;
impl DeviceOps for SdCardOps {}

/// Global mounting state shared by every logical unit.
pub struct MountManager {
    pub(crate) drivers: DriverSet,
    mount_flags: MountFlags,
    /// Occupancy of the FAT driver's fixed volume table.
    pub(crate) fat_slots: [bool; FAT_VOLUME_SLOTS],
    table: Mutex<DeviceTable>,
}

impl MountManager {
    pub fn new(drivers: DriverSet) -> Self {
        Self {
            drivers,
            mount_flags: MountFlags::default(),
            fat_slots: [false; FAT_VOLUME_SLOTS],
            table: Mutex::new(DeviceTable {
                entries: alloc::vec![VirtualDevice {
                    name: String::from(FALLBACK_DEVICE_NAME),
                    device_id: None,
                    ops: Arc::new(SdCardOps),
                }],
                default_idx: 0,
                device_ids: Vec::new(),
            }),
        }
    }

    /// Flags applied to subsequent mounts; volumes already mounted keep the
    /// flags they were mounted with.
    pub fn mount_flags(&self) -> MountFlags {
        self.mount_flags
    }

    pub fn set_mount_flags(&mut self, flags: MountFlags) {
        self.mount_flags = flags;
    }

    /// Number of currently mounted volumes across all logical units.
    pub fn mounted_device_count(&self) -> u32 {
        self.table.lock().device_ids.len() as u32
    }

    /// Registers a named device that is not backed by a mounted volume.
    pub fn add_builtin_device(&self, name: &str, ops: Arc<dyn DeviceOps>) -> UmsFsResult<()> {
        let mut table = self.table.lock();
        if table.find(name).is_some() {
            return Err(UmsFsError::DeviceNameTaken(String::from(name)));
        }
        table.entries.push(VirtualDevice {
            name: String::from(name),
            device_id: None,
            ops,
        });
        Ok(())
    }

    /// Makes `name` the default device. Returns false if no such device is
    /// registered.
    pub fn set_default_device(&self, name: &str) -> bool {
        let mut table = self.table.lock();
        match table.find(name) {
            Some(idx) => {
                table.default_idx = idx;
                true
            }
            None => false,
        }
    }

    pub fn default_device_name(&self) -> String {
        let table = self.table.lock();
        table.entries[table.default_idx].name.clone()
    }

    /// Operations vtable of the named device, for routing path-based file
    /// APIs to the right backend.
    pub fn device_ops(&self, name: &str) -> Option<Arc<dyn DeviceOps>> {
        let table = self.table.lock();
        let idx = table.find(name)?;
        Some(Arc::clone(&table.entries[idx].ops))
    }

    /// Detects and mounts every supported volume on `lun`, appending one
    /// filesystem context per success. Returns whether at least one volume
    /// ended up mounted.
    pub fn initialize_filesystems(&mut self, lun: &mut LogicalUnitContext) -> bool {
        debug!(
            "scanning interface {} LUN {}: {} blocks of {} bytes",
            lun.usb_if_id(),
            lun.lun(),
            lun.block_count(),
            lun.block_length()
        );

        let block = alloc::vec![0u8; lun.block_length() as usize];
        let mut task = MountTask {
            mgr: self,
            lun,
            block,
        };
        task.run()
    }

    /// Unmounts the volume identified by `device_id` and removes its
    /// virtual device. Returns false if `lun` has no such volume.
    pub fn destroy_filesystem_context(
        &mut self,
        lun: &mut LogicalUnitContext,
        device_id: u32,
    ) -> bool {
        let Some(idx) = lun
            .fs_contexts
            .iter()
            .position(|ctx| ctx.device_id == device_id)
        else {
            return false;
        };

        let ctx = lun.fs_contexts.remove(idx);
        self.remove_virtual_device(&ctx.name);
        self.unmount_volume_handle(ctx.handle);
        true
    }

    /// Tears down every volume mounted from `lun`, used when the device is
    /// removed.
    pub fn destroy_logical_unit_contexts(&mut self, lun: &mut LogicalUnitContext) {
        while let Some(ctx) = lun.fs_contexts.pop() {
            self.remove_virtual_device(&ctx.name);
            self.unmount_volume_handle(ctx.handle);
        }
    }

    /// ID the next registered volume will receive.
    pub(crate) fn peek_device_id(&self) -> u32 {
        self.table.lock().smallest_free_id()
    }

    pub(crate) fn claim_fat_slot(&mut self) -> Option<u8> {
        let slot = self.fat_slots.iter().position(|used| !used)?;
        self.fat_slots[slot] = true;
        Some(slot as u8)
    }

    pub(crate) fn release_fat_slot(&mut self, slot: u8) {
        self.fat_slots[slot as usize] = false;
    }

    pub(crate) fn register_virtual_device(
        &self,
        name: &str,
        device_id: u32,
        ops: Arc<dyn DeviceOps>,
    ) -> UmsFsResult<()> {
        let mut table = self.table.lock();
        if table.find(name).is_some() {
            return Err(UmsFsError::DeviceNameTaken(String::from(name)));
        }
        table.entries.push(VirtualDevice {
            name: String::from(name),
            device_id: Some(device_id),
            ops,
        });
        table.device_ids.push(device_id);
        Ok(())
    }

    /// Drops a device from the table and frees its device ID, resetting the
    /// default slot to the fallback if it pointed at the removed entry. The
    /// fallback itself is never removed.
    fn remove_virtual_device(&self, name: &str) {
        let mut table = self.table.lock();

        let Some(idx) = table.find(name) else {
            return;
        };
        if idx == 0 {
            return;
        }

        let removed = table.entries.remove(idx);
        if table.default_idx == idx {
            table.default_idx = 0;
        } else if table.default_idx > idx {
            table.default_idx -= 1;
        }

        if let Some(id) = removed.device_id {
            if let Some(pos) = table.device_ids.iter().position(|&candidate| candidate == id) {
                table.device_ids.remove(pos);
            }
        }
    }

    pub(crate) fn unmount_volume_handle(&mut self, handle: VolumeHandle) {
        match handle {
            VolumeHandle::Fat { slot, volume } => {
                volume.unmount();
                self.release_fat_slot(slot);
            }
            VolumeHandle::Ntfs(volume) => volume.unmount(),
            VolumeHandle::Ext(volume) => volume.unmount(),
        }
    }
}

/// One detection pass over a logical unit. Carries a single block-sized
/// scratch buffer reused for every sector inspected.
pub(crate) struct MountTask<'a> {
    mgr: &'a mut MountManager,
    lun: &'a mut LogicalUnitContext,
    block: Vec<u8>,
}

#[cfg(test)]
pub(crate) mod testkit {
    use alloc::{vec, vec::Vec};

    use super::MountManager;
    use crate::{
        device::{LogicalUnitContext, MemoryBlockDevice},
        drivers::mock::MockDriver,
        layout::BOOT_SIGNATURE,
        utils::crc32,
    };

    /// Assembles a raw disk image sector by sector.
    pub(crate) struct DiskBuilder {
        block_length: u32,
        data: Vec<u8>,
    }

    impl DiskBuilder {
        pub fn new(block_length: u32, blocks: u64) -> Self {
            Self {
                block_length,
                data: vec![0u8; (block_length as u64 * blocks) as usize],
            }
        }

        pub fn put(&mut self, lba: u64, bytes: &[u8]) {
            let off = (lba * self.block_length as u64) as usize;
            self.data[off..off + bytes.len()].copy_from_slice(bytes);
        }

        pub fn put_at(&mut self, offset: usize, bytes: &[u8]) {
            self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        pub fn blocks(&self) -> u64 {
            (self.data.len() / self.block_length as usize) as u64
        }

        pub fn lun(self) -> LogicalUnitContext {
            self.lun_with_write_protect(false)
        }

        pub fn lun_with_write_protect(self, write_protect: bool) -> LogicalUnitContext {
            let blocks = self.blocks();
            let reader = MemoryBlockDevice::new(self.block_length, self.data).expect("device");
            LogicalUnitContext::new(1, 0, self.block_length, blocks, write_protect, reader)
                .expect("logical unit")
        }
    }

    fn put_u16(sector: &mut [u8], off: usize, value: u16) {
        sector[off..off + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(sector: &mut [u8], off: usize, value: u32) {
        sector[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(sector: &mut [u8], off: usize, value: u64) {
        sector[off..off + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn signed_sector() -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        put_u16(&mut sector, 0x1FE, BOOT_SIGNATURE);
        sector
    }

    pub(crate) fn fat32_vbr() -> Vec<u8> {
        let mut sector = signed_sector();
        sector[0] = 0xEB;
        sector[0x52..0x5A].copy_from_slice(b"FAT32   ");
        sector
    }

    pub(crate) fn ntfs_vbr() -> Vec<u8> {
        let mut sector = signed_sector();
        sector[0] = 0xEB;
        sector[3..11].copy_from_slice(b"NTFS    ");
        sector
    }

    pub(crate) fn exfat_vbr() -> Vec<u8> {
        let mut sector = signed_sector();
        sector[..3].copy_from_slice(&[0xEB, 0x76, 0x90]);
        sector[3..11].copy_from_slice(b"EXFAT   ");
        sector
    }

    /// 1 KiB EXT4-style superblock that passes the structural checks.
    pub(crate) fn ext_superblock() -> Vec<u8> {
        let mut sb = vec![0u8; 1024];
        put_u32(&mut sb, 0x00, 0x4000); // inodes_count
        put_u32(&mut sb, 0x04, 0x40000); // blocks_count_lo
        put_u32(&mut sb, 0x14, 0); // first_data_block
        put_u32(&mut sb, 0x18, 2); // log_block_size, 4 KiB
        put_u32(&mut sb, 0x20, 32768); // blocks_per_group
        put_u32(&mut sb, 0x28, 8192); // inodes_per_group
        put_u16(&mut sb, 0x38, 0xEF53); // magic
        put_u32(&mut sb, 0x4C, 1); // rev_level
        put_u16(&mut sb, 0x58, 256); // inode_size
        sb
    }

    /// MBR with one entry per `(type, lba, block_count)` triple.
    pub(crate) fn mbr(entries: &[(u8, u32, u32)]) -> Vec<u8> {
        let mut sector = signed_sector();
        for (i, &(part_type, lba, count)) in entries.iter().enumerate() {
            let off = 0x1BE + i * 16;
            sector[off + 4] = part_type;
            put_u32(&mut sector, off + 8, lba);
            put_u32(&mut sector, off + 12, count);
        }
        sector
    }

    /// EBR holding one partition entry and, when `next_rel` is nonzero, a
    /// link to the next EBR at that LBA relative to the chain start.
    pub(crate) fn ebr(part: (u8, u32, u32), next_rel: u32) -> Vec<u8> {
        let mut sector = signed_sector();
        let (part_type, lba, count) = part;
        sector[0x1BE + 4] = part_type;
        put_u32(&mut sector, 0x1BE + 8, lba);
        put_u32(&mut sector, 0x1BE + 12, count);
        if next_rel != 0 {
            sector[0x1CE + 4] = 0x05;
            put_u32(&mut sector, 0x1CE + 8, next_rel);
        }
        sector
    }

    /// 128-byte GPT partition array entry.
    pub(crate) fn gpt_entry(type_guid: &[u8; 16], lba_start: u64, lba_end: u64) -> Vec<u8> {
        let mut entry = vec![0u8; 128];
        entry[..16].copy_from_slice(type_guid);
        put_u64(&mut entry, 0x20, lba_start);
        put_u64(&mut entry, 0x28, lba_end);
        entry
    }

    /// GPT header sector with a valid checksum over its used bytes.
    pub(crate) fn gpt_header(
        cur_lba: u64,
        backup_lba: u64,
        array_lba: u64,
        entry_count: u32,
        entry_size: u32,
    ) -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        sector[..8].copy_from_slice(b"EFI PART");
        put_u32(&mut sector, 0x08, 0x0001_0000);
        put_u32(&mut sector, 0x0C, 0x5C);
        put_u64(&mut sector, 0x18, cur_lba);
        put_u64(&mut sector, 0x20, backup_lba);
        put_u64(&mut sector, 0x48, array_lba);
        put_u32(&mut sector, 0x50, entry_count);
        put_u32(&mut sector, 0x54, entry_size);
        let csum = crc32(&sector[..0x5C]);
        put_u32(&mut sector, 0x10, csum);
        sector
    }

    pub(crate) fn manager(mock: &MockDriver) -> MountManager {
        let _ = env_logger::builder().is_test(true).try_init();
        MountManager::new(mock.driver_set())
    }
}
