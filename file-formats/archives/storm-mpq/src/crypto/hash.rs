//! The MPQ string hash

use super::keys::ENCRYPTION_TABLE;
use super::types::hash_type;

/// Hash a string using the MPQ hash algorithm
///
/// Forward slashes hash like backslashes and ASCII letters hash
/// case-insensitively, so every spelling of a member name lands on the same
/// values.
pub fn hash_string(name: &str, hash_type: u32) -> u32 {
    let mut seed1: u32 = 0x7FED_7FED;
    let mut seed2: u32 = 0xEEEE_EEEE;

    for &byte in name.as_bytes() {
        let ch = if byte == b'/' {
            b'\\'
        } else {
            byte.to_ascii_uppercase()
        };

        let table_idx = (hash_type * 0x100 + ch as u32) as usize;
        seed1 = ENCRYPTION_TABLE[table_idx] ^ seed1.wrapping_add(seed2);
        seed2 = (ch as u32)
            .wrapping_add(seed1)
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }

    seed1
}

/// The three hashes that place and identify a name in the hash directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameHashes {
    /// Start of the probe sequence
    pub table_offset: u32,
    /// First verification hash
    pub name_a: u32,
    /// Second verification hash
    pub name_b: u32,
}

impl NameHashes {
    /// Compute all three hashes of a member name
    pub fn new(name: &str) -> Self {
        Self {
            table_offset: hash_string(name, hash_type::TABLE_OFFSET),
            name_a: hash_string(name, hash_type::NAME_A),
            name_b: hash_string(name, hash_type::NAME_B),
        }
    }
}
