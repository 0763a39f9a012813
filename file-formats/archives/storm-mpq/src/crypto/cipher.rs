//! The MPQ block cipher and per-member keys

use super::hash::hash_string;
use super::keys::ENCRYPTION_TABLE;
use super::types::hash_type;
use crate::path::plain_name;

/// Running state of the cipher: the current key and seed
struct CipherState {
    key: u32,
    seed: u32,
}

impl CipherState {
    fn new(key: u32) -> Self {
        Self {
            key,
            seed: 0xEEEE_EEEE,
        }
    }

    #[inline]
    fn keystream(&mut self) -> u32 {
        self.seed = self
            .seed
            .wrapping_add(ENCRYPTION_TABLE[0x400 + (self.key & 0xFF) as usize]);
        self.key.wrapping_add(self.seed)
    }

    #[inline]
    fn advance(&mut self, plain: u32) {
        self.key = (!self.key << 0x15).wrapping_add(0x1111_1111) | (self.key >> 0x0B);
        self.seed = plain
            .wrapping_add(self.seed)
            .wrapping_add(self.seed << 5)
            .wrapping_add(3);
    }

    #[inline]
    fn encrypt(&mut self, plain: u32) -> u32 {
        let cipher = plain ^ self.keystream();
        self.advance(plain);
        cipher
    }

    #[inline]
    fn decrypt(&mut self, cipher: u32) -> u32 {
        let plain = cipher ^ self.keystream();
        self.advance(plain);
        plain
    }
}

/// Encrypt a block of dwords in place
pub fn encrypt_block(data: &mut [u32], key: u32) {
    if key == 0 {
        return;
    }

    let mut state = CipherState::new(key);
    for value in data.iter_mut() {
        *value = state.encrypt(*value);
    }
}

/// Decrypt a block of dwords in place
pub fn decrypt_block(data: &mut [u32], key: u32) {
    if key == 0 {
        return;
    }

    let mut state = CipherState::new(key);
    for value in data.iter_mut() {
        *value = state.decrypt(*value);
    }
}

/// Decrypt a single DWORD value that starts a block
pub fn decrypt_dword(value: u32, key: u32) -> u32 {
    if key == 0 {
        return value;
    }
    CipherState::new(key).decrypt(value)
}

/// Encrypt a byte buffer in place, dword by dword
///
/// A trailing partial dword stays in plaintext.
pub fn encrypt_bytes(data: &mut [u8], key: u32) {
    if key == 0 {
        return;
    }

    let mut state = CipherState::new(key);
    for chunk in data.chunks_exact_mut(4) {
        let plain = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&state.encrypt(plain).to_le_bytes());
    }
}

/// Decrypt a byte buffer in place, dword by dword
///
/// A trailing partial dword is left untouched.
pub fn decrypt_bytes(data: &mut [u8], key: u32) {
    if key == 0 {
        return;
    }

    let mut state = CipherState::new(key);
    for chunk in data.chunks_exact_mut(4) {
        let cipher = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&state.decrypt(cipher).to_le_bytes());
    }
}

/// Compute the encryption key of a member
///
/// The key comes from the plain name (no directory part). With `fix_key` it is
/// further bound to the member's offset and size, so identical names at
/// different places never share a key.
pub fn file_key(name: &str, file_pos: u64, file_size: u32, fix_key: bool) -> u32 {
    let key = hash_string(plain_name(name), hash_type::FILE_KEY);
    if fix_key {
        key.wrapping_add(file_pos as u32) ^ file_size
    } else {
        key
    }
}

/// Recover a member key from its encrypted sector offset table
///
/// `encrypted` holds the first two encrypted dwords of the table and
/// `decrypted0` the known plaintext of the first one (the table size in bytes).
/// The second dword must decrypt to an offset no larger than
/// `decrypted0 + sector_size`. Returns the member key (the table itself is
/// encrypted with `key - 1`).
pub fn detect_file_key(encrypted: [u32; 2], sector_size: u32, decrypted0: u32) -> Option<u32> {
    if sector_size < 0x08 {
        return None;
    }

    let max_second = decrypted0.wrapping_add(sector_size);
    let key_plus_seed = (encrypted[0] ^ decrypted0).wrapping_sub(0xEEEE_EEEE);

    for i in 0..0x100usize {
        let candidate = key_plus_seed.wrapping_sub(ENCRYPTION_TABLE[0x400 + i]);

        let mut state = CipherState::new(candidate);
        if state.decrypt(encrypted[0]) != decrypted0 {
            continue;
        }
        if state.decrypt(encrypted[1]) <= max_second {
            return Some(candidate.wrapping_add(1));
        }
    }

    None
}
