#![cfg_attr(not(feature = "std"), no_std)]
#![deny(clippy::unwrap_used)]

//! Filesystem detection and mounting for removable mass-storage devices:
//! walks MBR/EBR/GPT partition structures, sniffs VBRs and EXT superblocks,
//! hands recognized volumes to the FAT/NTFS/EXT driver collaborators and
//! exposes each mounted volume as a named virtual device.

extern crate alloc;

pub mod device;
pub mod drivers;
pub mod error;
pub mod layout;
pub mod mount;
pub mod utils;

pub use error::{UmsFsError, UmsFsResult};

pub mod prelude {
    pub use super::{
        device::{BlockReader, LogicalUnitContext, MemoryBlockDevice, PartitionDevice},
        drivers::{DriverSet, FilesystemType, MountFlags},
        mount::MountManager,
        UmsFsError, UmsFsResult,
    };
}

#[cfg(feature = "std")]
pub(crate) use parking_lot as sync_impl;

#[cfg(not(feature = "std"))]
pub(crate) use spin as sync_impl;
