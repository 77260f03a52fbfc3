//! Hashing utilities for key-affine routing

use std::sync::Arc;

/// Key hash used by the hash router
pub type HashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Compute the 32-bit FNV-1a hash of the given bytes.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// The default router hash (FNV-1a, 32 bit)
pub fn default_hash_fn() -> HashFn {
    Arc::new(fnv1a_32)
}
