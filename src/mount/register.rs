//! Mounting an identified volume and publishing its virtual device.

use alloc::{format, string::String, sync::Arc};

use log::{info, warn};

use super::{FilesystemContext, MountTask, VolumeHandle, MOUNT_NAME_PREFIX};
use crate::{
    drivers::{
        ExtMountSource, FatMountSource, FilesystemType, MountFlags, NtfsMountOptions,
        NtfsMountSource,
    },
    UmsFsError, UmsFsResult,
};

impl MountTask<'_> {
    /// Mounts the identified volume and registers it as a virtual device.
    /// Failures are logged rather than propagated so the scan moves on to
    /// the remaining partitions.
    pub(super) fn register_volume(&mut self, base_lba: u64, block_count: u64, fs_type: FilesystemType) {
        match self.try_register_volume(base_lba, block_count, fs_type) {
            Ok(name) => info!(
                "mounted {fs_type} volume of {block_count} blocks at LBA {base_lba:#x} as {name}"
            ),
            Err(err) => warn!("failed to mount {fs_type} volume at LBA {base_lba:#x}: {err}"),
        }
    }

    fn try_register_volume(
        &mut self,
        base_lba: u64,
        block_count: u64,
        fs_type: FilesystemType,
    ) -> UmsFsResult<String> {
        let flags = self.mgr.mount_flags();
        let fs_idx = self.lun.filesystem_count();
        let device_id = self.mgr.peek_device_id();
        let name = format!("{MOUNT_NAME_PREFIX}{device_id}");
        let device = self.lun.partition_device(base_lba, block_count)?;
        let read_only = flags.contains(MountFlags::READ_ONLY) || self.lun.write_protect();

        let (handle, ops) = match fs_type {
            FilesystemType::Fat => {
                let slot = self.mgr.claim_fat_slot().ok_or(UmsFsError::NoFreeVolumeSlot)?;
                let driver = Arc::clone(&self.mgr.drivers.fat);
                let source = FatMountSource {
                    device,
                    slot,
                    vbr: &self.block,
                    read_only,
                };
                match driver.mount(source) {
                    Ok(volume) => (VolumeHandle::Fat { slot, volume }, driver.operations()),
                    Err(err) => {
                        self.mgr.release_fat_slot(slot);
                        return Err(UmsFsError::DriverMount(err));
                    }
                }
            }
            FilesystemType::Ntfs => {
                let driver = Arc::clone(&self.mgr.drivers.ntfs);
                let source = NtfsMountSource {
                    device_name: name.clone(),
                    device,
                    vbr: &self.block,
                    options: NtfsMountOptions {
                        read_only,
                        replay_journal: flags.contains(MountFlags::REPLAY_JOURNAL),
                        ignore_hibernation: flags.contains(MountFlags::IGNORE_HIBERNATION),
                        update_access_times: flags.contains(MountFlags::UPDATE_ACCESS_TIMES),
                        ignore_read_only_attribute: flags
                            .contains(MountFlags::IGNORE_FILE_READ_ONLY_ATTRIBUTE),
                    },
                };
                let mut volume = driver.mount(source).map_err(UmsFsError::DriverMount)?;

                volume.init_caches();
                if flags.contains(MountFlags::IGNORE_CASE_SENSITIVITY) {
                    volume.set_ignore_case();
                }
                volume.set_shown_files(
                    flags.contains(MountFlags::SHOW_SYSTEM_FILES),
                    flags.contains(MountFlags::SHOW_HIDDEN_FILES),
                );
                if let Err(err) = volume.prefetch_free_space() {
                    volume.unmount();
                    return Err(UmsFsError::DriverMount(err));
                }
                (VolumeHandle::Ntfs(volume), driver.operations())
            }
            FilesystemType::Ext => {
                let driver = Arc::clone(&self.mgr.drivers.ext);
                let source = ExtMountSource {
                    device_name: name.clone(),
                    device,
                    flags,
                };
                let volume = driver.mount(source).map_err(UmsFsError::DriverMount)?;
                (VolumeHandle::Ext(volume), driver.operations())
            }
        };

        if let Err(err) = self.mgr.register_virtual_device(&name, device_id, ops) {
            self.mgr.unmount_volume_handle(handle);
            return Err(err);
        }

        self.lun.fs_contexts.push(FilesystemContext {
            usb_if_id: self.lun.usb_if_id(),
            lun: self.lun.lun(),
            fs_idx,
            flags,
            device_id,
            name: name.clone(),
            cwd: String::from("/"),
            handle,
        });
        Ok(name)
    }
}
