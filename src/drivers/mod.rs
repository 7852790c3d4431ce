//! Seams between the detection logic and the filesystem drivers proper.
//!
//! The mount path never walks directory trees itself. Once a volume has been
//! identified it hands the partition window to one of these driver traits and
//! keeps only an opaque volume handle for the eventual unmount.

use alloc::{boxed::Box, string::String, sync::Arc};
use core::fmt;

use crate::device::PartitionDevice;

/// Errors surfaced by driver backends.
pub type DriverError = anyhow::Error;

/// Filesystem families the detection path can identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemType {
    /// FAT12/FAT16/FAT32/exFAT.
    Fat,
    Ntfs,
    /// EXT2/3/4.
    Ext,
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilesystemType::Fat => "FAT",
            FilesystemType::Ntfs => "NTFS",
            FilesystemType::Ext => "EXT",
        })
    }
}

bitflags::bitflags! {
    /// Behavior toggles applied when a volume is mounted. Drivers that have
    /// no use for a given flag ignore it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        const UPDATE_ACCESS_TIMES = 1 << 0;
        const SHOW_HIDDEN_FILES = 1 << 1;
        const SHOW_SYSTEM_FILES = 1 << 2;
        const READ_ONLY = 1 << 3;
        /// Replay the journal of NTFS and EXT3/4 volumes left dirty.
        const REPLAY_JOURNAL = 1 << 4;
        const IGNORE_CASE_SENSITIVITY = 1 << 5;
        const IGNORE_FILE_READ_ONLY_ATTRIBUTE = 1 << 6;
        /// Mount NTFS volumes even when a hibernation image is present.
        const IGNORE_HIBERNATION = 1 << 7;
    }
}

impl Default for MountFlags {
    fn default() -> Self {
        MountFlags::UPDATE_ACCESS_TIMES | MountFlags::SHOW_HIDDEN_FILES | MountFlags::REPLAY_JOURNAL
    }
}

/// Filesystem operations vtable published through the virtual device table.
/// The detection layer treats it as opaque.
pub trait DeviceOps: Send + Sync {}

/// The FAT backend addresses volumes by a fixed slot table, so concurrent
/// FAT mounts across every device are capped at this many.
pub const FAT_VOLUME_SLOTS: usize = 8;

/// Everything a FAT driver needs to bring up a volume.
pub struct FatMountSource<'a> {
    pub device: PartitionDevice,
    /// Slot in the driver's volume table, below [`FAT_VOLUME_SLOTS`].
    pub slot: u8,
    /// Raw device block holding the volume's boot sector.
    pub vbr: &'a [u8],
    pub read_only: bool,
}

pub trait FatVolume: Send {
    fn unmount(self: Box<Self>);
}

pub trait FatDriver: Send + Sync {
    fn mount(&self, source: FatMountSource<'_>) -> Result<Box<dyn FatVolume>, DriverError>;
    fn operations(&self) -> Arc<dyn DeviceOps>;
}

/// Mount-time options for the NTFS backend, derived from [`MountFlags`].
#[derive(Debug, Clone, Copy)]
pub struct NtfsMountOptions {
    pub read_only: bool,
    pub replay_journal: bool,
    pub ignore_hibernation: bool,
    pub update_access_times: bool,
    pub ignore_read_only_attribute: bool,
}

pub struct NtfsMountSource<'a> {
    pub device_name: String,
    pub device: PartitionDevice,
    pub vbr: &'a [u8],
    pub options: NtfsMountOptions,
}

pub trait NtfsVolume: Send {
    fn init_caches(&mut self);
    fn set_ignore_case(&mut self);
    fn set_shown_files(&mut self, show_system: bool, show_hidden: bool);
    /// Warms the free cluster count; failure aborts the mount.
    fn prefetch_free_space(&mut self) -> Result<(), DriverError>;
    fn unmount(self: Box<Self>);
}

pub trait NtfsDriver: Send + Sync {
    fn mount(&self, source: NtfsMountSource<'_>) -> Result<Box<dyn NtfsVolume>, DriverError>;
    fn operations(&self) -> Arc<dyn DeviceOps>;
}

pub struct ExtMountSource {
    pub device_name: String,
    pub device: PartitionDevice,
    pub flags: MountFlags,
}

pub trait ExtVolume: Send {
    fn unmount(self: Box<Self>);
}

pub trait ExtDriver: Send + Sync {
    fn mount(&self, source: ExtMountSource) -> Result<Box<dyn ExtVolume>, DriverError>;
    fn operations(&self) -> Arc<dyn DeviceOps>;
}

/// One backend per supported filesystem family.
#[derive(Clone)]
pub struct DriverSet {
    pub fat: Arc<dyn FatDriver>,
    pub ntfs: Arc<dyn NtfsDriver>,
    pub ext: Arc<dyn ExtDriver>,
}

#[cfg(test)]
pub(crate) mod mock {
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::sync_impl::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct MountEvent {
        pub fs_type: FilesystemType,
        pub base_lba: u64,
        pub block_count: u64,
        pub slot: Option<u8>,
        pub read_only: bool,
    }

    #[derive(Default)]
    pub(crate) struct MockState {
        mounts: AtomicUsize,
        unmounts: AtomicUsize,
        pub fail_mount: AtomicBool,
        pub fail_free_space: AtomicBool,
        pub events: Mutex<Vec<MountEvent>>,
    }

    /// One mock backend serving all three driver traits, recording every
    /// mount so tests can assert on partition geometry and ordering.
    #[derive(Clone, Default)]
    pub(crate) struct MockDriver {
        state: Arc<MockState>,
    }

    pub(crate) struct MockVolume {
        state: Arc<MockState>,
    }

    struct MockOps;
    impl DeviceOps for MockOps {}

    impl MockDriver {
        pub fn driver_set(&self) -> DriverSet {
            DriverSet {
                fat: Arc::new(self.clone()),
                ntfs: Arc::new(self.clone()),
                ext: Arc::new(self.clone()),
            }
        }

        pub fn state(&self) -> &MockState {
            &self.state
        }

        /// Volumes currently mounted through this backend.
        pub fn live(&self) -> usize {
            self.state.mounts.load(Ordering::SeqCst) - self.state.unmounts.load(Ordering::SeqCst)
        }

        pub fn events(&self) -> Vec<MountEvent> {
            self.state.events.lock().clone()
        }

        fn record(&self, event: MountEvent) -> Result<MockVolume, DriverError> {
            if self.state.fail_mount.load(Ordering::SeqCst) {
                anyhow::bail!("mock driver configured to fail");
            }
            self.state.events.lock().push(event);
            self.state.mounts.fetch_add(1, Ordering::SeqCst);
            Ok(MockVolume {
                state: self.state.clone(),
            })
        }
    }

    impl MockVolume {
        fn release(&self) {
            self.state.unmounts.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl FatVolume for MockVolume {
        fn unmount(self: Box<Self>) {
            self.release();
        }
    }

    impl NtfsVolume for MockVolume {
        fn init_caches(&mut self) {}
        fn set_ignore_case(&mut self) {}
        fn set_shown_files(&mut self, _show_system: bool, _show_hidden: bool) {}

        fn prefetch_free_space(&mut self) -> Result<(), DriverError> {
            if self.state.fail_free_space.load(Ordering::SeqCst) {
                anyhow::bail!("mock free space scan failed");
            }
            Ok(())
        }

        fn unmount(self: Box<Self>) {
            self.release();
        }
    }

    impl ExtVolume for MockVolume {
        fn unmount(self: Box<Self>) {
            self.release();
        }
    }

    impl FatDriver for MockDriver {
        fn mount(&self, source: FatMountSource<'_>) -> Result<Box<dyn FatVolume>, DriverError> {
            let volume = self.record(MountEvent {
                fs_type: FilesystemType::Fat,
                base_lba: source.device.base_lba(),
                block_count: source.device.block_count(),
                slot: Some(source.slot),
                read_only: source.read_only,
            })?;
            Ok(Box::new(volume))
        }

        fn operations(&self) -> Arc<dyn DeviceOps> {
            Arc::new(MockOps)
        }
    }

    impl NtfsDriver for MockDriver {
        fn mount(&self, source: NtfsMountSource<'_>) -> Result<Box<dyn NtfsVolume>, DriverError> {
            let volume = self.record(MountEvent {
                fs_type: FilesystemType::Ntfs,
                base_lba: source.device.base_lba(),
                block_count: source.device.block_count(),
                slot: None,
                read_only: source.options.read_only,
            })?;
            Ok(Box::new(volume))
        }

        fn operations(&self) -> Arc<dyn DeviceOps> {
            Arc::new(MockOps)
        }
    }

    impl ExtDriver for MockDriver {
        fn mount(&self, source: ExtMountSource) -> Result<Box<dyn ExtVolume>, DriverError> {
            let volume = self.record(MountEvent {
                fs_type: FilesystemType::Ext,
                base_lba: source.device.base_lba(),
                block_count: source.device.block_count(),
                slot: None,
                read_only: source.flags.contains(MountFlags::READ_ONLY),
            })?;
            Ok(Box::new(volume))
        }

        fn operations(&self) -> Arc<dyn DeviceOps> {
            Arc::new(MockOps)
        }
    }
}
