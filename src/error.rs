use alloc::string::String;

#[derive(Debug, thiserror_no_std::Error)]
pub enum UmsFsError {
    #[error("binrw error")]
    BinRw(#[from] binrw::Error),

    #[error("IO error")]
    Io(#[from] binrw::io::Error),

    #[error("read of {count} block(s) at LBA {lba:#x} exceeds the device capacity of {capacity} blocks")]
    BlockReadOutOfRange { lba: u64, count: u64, capacity: u64 },

    #[error("partition of {block_count} blocks at LBA {base_lba:#x} exceeds the device capacity of {capacity} blocks")]
    PartitionOutOfRange {
        base_lba: u64,
        block_count: u64,
        capacity: u64,
    },

    #[error("unsupported block length of {0} bytes")]
    UnsupportedBlockLength(u32),

    #[error("no free driver volume slot")]
    NoFreeVolumeSlot,

    #[error("virtual device name \"{0}\" is already registered")]
    DeviceNameTaken(String),

    #[error("filesystem driver rejected the volume: {0}")]
    DriverMount(anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type UmsFsResult<T> = core::result::Result<T, UmsFsError>;
