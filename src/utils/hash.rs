use crc32fast::Hasher;

/// CRC32 over a whole page, the per-page fingerprint kept in a material.
pub fn calculate_page_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32 over several slices as if they were one buffer.
pub fn calculate_checksum<'a, I>(parts: I) -> u32
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
