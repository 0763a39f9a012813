//! Cryptographic primitives of the MPQ format
//!
//! - **Hashing**: the classic MPQ string hash, used for hash directory probing,
//!   name verification and encryption key derivation
//! - **Encryption/Decryption**: the MPQ block cipher over little-endian dwords
//! - **File keys**: per-member keys, including the `FIX_KEY` variant and key
//!   recovery for members whose name is unknown
//!
//! ## Examples
//!
//! ```
//! use storm_mpq::crypto::{decrypt_block, encrypt_block, hash_string, hash_type};
//!
//! let key = hash_string("(hash table)", hash_type::FILE_KEY);
//! assert_eq!(key, 0xC3AF3770);
//!
//! let mut data = [0x1234_5678u32, 0x9ABC_DEF0];
//! encrypt_block(&mut data, key);
//! decrypt_block(&mut data, key);
//! assert_eq!(data, [0x1234_5678, 0x9ABC_DEF0]);
//! ```

mod cipher;
mod hash;
mod keys;
mod types;

pub use cipher::{
    decrypt_block, decrypt_bytes, decrypt_dword, detect_file_key, encrypt_block, encrypt_bytes,
    file_key,
};
pub use hash::{NameHashes, hash_string};
pub use keys::{BLOCK_TABLE_KEY, ENCRYPTION_TABLE, HASH_TABLE_KEY};
pub use types::hash_type;
