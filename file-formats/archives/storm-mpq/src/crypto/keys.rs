//! The MPQ encryption table and well-known table keys

/// Number of dwords in the encryption table
const TABLE_LEN: usize = 0x500;

/// Key of the hash table, `hash_string("(hash table)", FILE_KEY)`
pub const HASH_TABLE_KEY: u32 = 0xC3AF_3770;

/// Key of the block table, `hash_string("(block table)", FILE_KEY)`
pub const BLOCK_TABLE_KEY: u32 = 0xEC83_B3A3;

/// Encryption table shared by hashing and the block cipher
///
/// Five rows of 0x100 values; rows 0..=3 back the hash types, row 4 drives the
/// cipher's seed.
pub static ENCRYPTION_TABLE: [u32; TABLE_LEN] = build_encryption_table();

const fn build_encryption_table() -> [u32; TABLE_LEN] {
    let mut table = [0u32; TABLE_LEN];
    let mut seed: u32 = 0x0010_0001;

    let mut index1 = 0;
    while index1 < 0x100 {
        let mut index2 = index1;
        let mut round = 0;
        while round < 5 {
            seed = (seed * 125 + 3) % 0x2A_AAAB;
            let high = (seed & 0xFFFF) << 0x10;
            seed = (seed * 125 + 3) % 0x2A_AAAB;
            let low = seed & 0xFFFF;

            table[index2] = high | low;
            index2 += 0x100;
            round += 1;
        }
        index1 += 1;
    }

    table
}
