//! MPQ table structures (hash directory and block table)

mod block;
mod hash;

pub use block::{BLOCK_ENTRY_SIZE, BlockEntry, BlockFlags, BlockTable};
pub use hash::{
    BLOCK_INDEX_DELETED, BLOCK_INDEX_FREE, HASH_ENTRY_SIZE, HashDirectory, HashEntry, HashSlot,
    LOCALE_NEUTRAL, MAX_HASH_TABLE_SIZE, MIN_HASH_TABLE_SIZE,
};
