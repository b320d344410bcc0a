//! Integer mix functions used to pick a bucket.
//!
//! All variants are Thomas Wang's avalanche mixes reduced modulo
//! [`BUCKETS`]. The 8/16/32-bit variants zero-extend their key and share
//! the 32-bit mix; the 64-bit variant has its own mix.

/// Number of buckets in every [`FlowTable`](crate::FlowTable). Never changes.
pub const BUCKETS: usize = 128;

#[inline]
fn mix32(mut key: u32) -> u32 {
    key = key.wrapping_add(!(key << 15));
    key ^= key >> 10;
    key = key.wrapping_add(key << 3);
    key ^= key >> 6;
    key = key.wrapping_add(!(key << 11));
    key ^= key >> 16;
    key
}

#[inline]
fn mix64(mut key: u64) -> u64 {
    key = key.wrapping_add(!(key << 32));
    key ^= key >> 22;
    key = key.wrapping_add(!(key << 13));
    key ^= key >> 8;
    key = key.wrapping_add(key << 3);
    key ^= key >> 15;
    key = key.wrapping_add(!(key << 27));
    key ^= key >> 31;
    key
}

#[inline]
pub fn hash_u8(key: u8) -> usize {
    hash_u32(u32::from(key))
}

#[inline]
pub fn hash_u16(key: u16) -> usize {
    hash_u32(u32::from(key))
}

/// Bucket index for an address key. This is the hash the table uses.
#[inline]
pub fn hash_u32(key: u32) -> usize {
    mix32(key) as usize % BUCKETS
}

#[inline]
pub fn hash_u64(key: u64) -> usize {
    (mix64(key) % BUCKETS as u64) as usize
}
