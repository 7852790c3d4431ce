//! Byte-exact on-disk structures consumed while detecting filesystems.

pub mod ext;
pub mod gpt;
pub mod mbr;
pub mod vbr;

/// Boot sector signature shared by MBRs, EBRs and Microsoft VBRs.
pub const BOOT_SIGNATURE: u16 = 0xAA55;
