//! Checksum helpers shared by the partition and superblock parsers.

/// CRC32 (IEEE 802.3 polynomial) with the usual pre/post inversion, as used
/// by GPT headers.
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = crc_table(0xEDB8_8320);

    let mut crc = 0xFFFF_FFFF;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

/// Raw CRC32C (Castagnoli polynomial) update without final inversion. EXT
/// superblock checksums chain this with an all-ones seed and store the
/// result as-is.
pub fn crc32c(seed: u32, data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = crc_table(0x82F6_3B78);

    let mut crc = seed;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    crc
}

const fn crc_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}
