//! Hash directory: open addressing over a power-of-two table
//!
//! Probing starts at `table_offset & (size - 1)` and walks forward, wrapping
//! around, until a free slot. Deleted slots are skipped during lookups but may
//! be reused by insertions.

use crate::crypto::{HASH_TABLE_KEY, NameHashes, decrypt_block, encrypt_block};
use crate::options::LocaleFallback;
use crate::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};

/// Size of one hash table entry on disk
pub const HASH_ENTRY_SIZE: usize = 16;

/// Smallest hash table the engine creates
pub const MIN_HASH_TABLE_SIZE: u32 = 4;

/// Largest hash table the engine creates
pub const MAX_HASH_TABLE_SIZE: u32 = 0x80000;

/// Block index of a slot that was never used
pub const BLOCK_INDEX_FREE: u32 = 0xFFFF_FFFF;

/// Block index of a slot whose member was removed
pub const BLOCK_INDEX_DELETED: u32 = 0xFFFF_FFFE;

/// Language neutral locale
pub const LOCALE_NEUTRAL: u16 = 0;

/// An occupied hash table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    /// First verification hash of the name
    pub name_a: u32,
    /// Second verification hash of the name
    pub name_b: u32,
    /// Windows LANGID of the member, 0 for neutral
    pub locale: u16,
    /// Platform of the member, always 0 in practice
    pub platform: u16,
    /// Index into the block table
    pub block_index: u32,
}

impl HashEntry {
    /// Check if this entry belongs to a name
    pub fn matches(&self, hashes: &NameHashes) -> bool {
        self.name_a == hashes.name_a && self.name_b == hashes.name_b
    }
}

/// State of one hash table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSlot {
    /// Never used; ends every probe sequence
    Free,
    /// Tombstone left by a removal; probing continues past it
    Deleted,
    /// Points at a block table entry
    Occupied(HashEntry),
}

impl HashSlot {
    fn from_dwords(raw: &[u32]) -> Self {
        match raw[3] {
            BLOCK_INDEX_FREE => HashSlot::Free,
            BLOCK_INDEX_DELETED => HashSlot::Deleted,
            block_index => HashSlot::Occupied(HashEntry {
                name_a: raw[0],
                name_b: raw[1],
                locale: raw[2] as u16,
                platform: (raw[2] >> 16) as u16,
                block_index,
            }),
        }
    }

    fn to_dwords(self) -> [u32; 4] {
        match self {
            HashSlot::Free => [u32::MAX, u32::MAX, u32::MAX, BLOCK_INDEX_FREE],
            HashSlot::Deleted => [u32::MAX, u32::MAX, u32::MAX, BLOCK_INDEX_DELETED],
            HashSlot::Occupied(e) => [
                e.name_a,
                e.name_b,
                e.locale as u32 | ((e.platform as u32) << 16),
                e.block_index,
            ],
        }
    }

    /// The entry of an occupied slot
    pub fn entry(&self) -> Option<&HashEntry> {
        match self {
            HashSlot::Occupied(entry) => Some(entry),
            _ => None,
        }
    }
}

/// The hash directory of an archive
#[derive(Debug, Clone)]
pub struct HashDirectory {
    slots: Vec<HashSlot>,
}

impl HashDirectory {
    /// Create a directory where every slot is free
    pub fn new(size: u32) -> Result<Self> {
        Self::check_size(size)?;
        Ok(Self {
            slots: vec![HashSlot::Free; size as usize],
        })
    }

    /// Hash table size for a requested member capacity
    pub fn size_for_capacity(max_file_count: u32) -> Result<u32> {
        if max_file_count == 0 {
            return Err(Error::invalid_argument("max file count must be at least 1"));
        }
        let size = max_file_count
            .checked_next_power_of_two()
            .unwrap_or(u32::MAX)
            .max(MIN_HASH_TABLE_SIZE);
        if size > MAX_HASH_TABLE_SIZE {
            return Err(Error::invalid_argument(format!(
                "max file count {max_file_count} exceeds the limit of {MAX_HASH_TABLE_SIZE}"
            )));
        }
        Ok(size)
    }

    fn check_size(size: u32) -> Result<()> {
        if !crate::is_power_of_two(size) {
            return Err(Error::invalid_format(format!(
                "hash table size {size} is not a power of two"
            )));
        }
        Ok(())
    }

    /// Parse an encrypted hash table
    pub fn from_bytes(data: &[u8], size: u32) -> Result<Self> {
        Self::check_size(size)?;
        let expected = size as usize * HASH_ENTRY_SIZE;
        if data.len() < expected {
            return Err(Error::invalid_format(format!(
                "hash table needs {expected} bytes, found {}",
                data.len()
            )));
        }

        let mut dwords: Vec<u32> = data[..expected]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        decrypt_block(&mut dwords, HASH_TABLE_KEY);

        Ok(Self {
            slots: dwords.chunks_exact(4).map(HashSlot::from_dwords).collect(),
        })
    }

    /// Serialize and encrypt the table
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut dwords: Vec<u32> = self.slots.iter().flat_map(|s| s.to_dwords()).collect();
        encrypt_block(&mut dwords, HASH_TABLE_KEY);

        let mut bytes = Vec::with_capacity(dwords.len() * 4);
        for dword in dwords {
            bytes.write_u32::<LittleEndian>(dword)?;
        }
        Ok(bytes)
    }

    /// Number of slots
    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// All slots in table order
    pub fn slots(&self) -> &[HashSlot] {
        &self.slots
    }

    /// Get one slot
    pub fn slot(&self, index: usize) -> Option<&HashSlot> {
        self.slots.get(index)
    }

    /// Occupied slots in table order
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &HashEntry)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.entry().map(|e| (i, e)))
    }

    /// Number of occupied slots
    pub fn live_count(&self) -> usize {
        self.occupied().count()
    }

    /// Slot indices in probe order for a name
    fn probe(&self, hashes: &NameHashes) -> impl Iterator<Item = usize> + '_ {
        let mask = self.slots.len() - 1;
        let start = hashes.table_offset as usize & mask;
        (0..self.slots.len())
            .map(move |i| (start + i) & mask)
            .take_while(|&i| self.slots[i] != HashSlot::Free)
    }

    /// Every slot holding the name, in probe order
    pub fn find_all(&self, hashes: &NameHashes) -> Vec<(usize, HashEntry)> {
        self.probe(hashes)
            .filter_map(|i| match self.slots[i] {
                HashSlot::Occupied(entry) if entry.matches(hashes) => Some((i, entry)),
                _ => None,
            })
            .collect()
    }

    /// Find the slot for an exact name and locale
    pub fn find_exact(&self, hashes: &NameHashes, locale: u16) -> Option<(usize, HashEntry)> {
        self.find_all(hashes)
            .into_iter()
            .find(|(_, entry)| entry.locale == locale)
    }

    /// Resolve a name, falling back to other locales as allowed
    ///
    /// The exact locale always wins; `Neutral` then accepts the neutral
    /// locale, and `Any` additionally accepts the first match in probe order.
    pub fn lookup(
        &self,
        hashes: &NameHashes,
        locale: u16,
        fallback: LocaleFallback,
    ) -> Option<(usize, HashEntry)> {
        let matches = self.find_all(hashes);
        if let Some(found) = matches.iter().find(|(_, e)| e.locale == locale) {
            return Some(*found);
        }
        match fallback {
            LocaleFallback::Exact => None,
            LocaleFallback::Neutral => matches
                .into_iter()
                .find(|(_, e)| e.locale == LOCALE_NEUTRAL),
            LocaleFallback::Any => matches
                .iter()
                .find(|(_, e)| e.locale == LOCALE_NEUTRAL)
                .or_else(|| matches.first())
                .copied(),
        }
    }

    /// Record a new entry in the first free or deleted slot of its chain
    pub fn insert(
        &mut self,
        hashes: &NameHashes,
        locale: u16,
        platform: u16,
        block_index: u32,
    ) -> Result<usize> {
        let mask = self.slots.len() - 1;
        let start = hashes.table_offset as usize & mask;
        let slot = (0..self.slots.len())
            .map(|i| (start + i) & mask)
            .find(|&i| !matches!(self.slots[i], HashSlot::Occupied(_)))
            .ok_or(Error::HashTableFull)?;

        self.slots[slot] = HashSlot::Occupied(HashEntry {
            name_a: hashes.name_a,
            name_b: hashes.name_b,
            locale,
            platform,
            block_index,
        });
        Ok(slot)
    }

    /// Turn an occupied slot into a tombstone
    pub fn remove(&mut self, slot: usize) -> Result<HashEntry> {
        match self.slots.get(slot).copied() {
            Some(HashSlot::Occupied(entry)) => {
                self.slots[slot] = HashSlot::Deleted;
                Ok(entry)
            }
            _ => Err(Error::invalid_argument(format!(
                "hash slot {slot} is not occupied"
            ))),
        }
    }

    /// Mutable access to the entry of an occupied slot
    pub fn entry_mut(&mut self, slot: usize) -> Option<&mut HashEntry> {
        match self.slots.get_mut(slot) {
            Some(HashSlot::Occupied(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Replace occupied slots whose block index fails `valid` by tombstones
    pub fn retain_valid(&mut self, mut valid: impl FnMut(&HashEntry) -> bool) -> usize {
        let mut dropped = 0;
        for slot in &mut self.slots {
            if let HashSlot::Occupied(entry) = slot {
                if !valid(entry) {
                    *slot = HashSlot::Deleted;
                    dropped += 1;
                }
            }
        }
        dropped
    }

    /// Rebuild the directory with `new_size` slots
    ///
    /// The probe start of an entry cannot be recovered from the slot itself,
    /// so `resolve` must produce the name hashes of every occupied slot.
    pub fn rehash(
        &self,
        new_size: u32,
        mut resolve: impl FnMut(&HashEntry) -> Option<NameHashes>,
    ) -> Result<Self> {
        let live = self.live_count();
        if (new_size as usize) < live {
            return Err(Error::invalid_argument(format!(
                "hash table of {new_size} slots cannot hold {live} members"
            )));
        }

        let mut rebuilt = Self::new(new_size)?;
        for (_, entry) in self.occupied() {
            let hashes = resolve(entry).ok_or_else(|| {
                Error::unsupported(format!(
                    "cannot rehash: name of block {} is unknown",
                    entry.block_index
                ))
            })?;
            rebuilt.insert(&hashes, entry.locale, entry.platform, entry.block_index)?;
        }

        log::debug!("Rehashed {live} entries from {} to {new_size} slots", self.size());
        Ok(rebuilt)
    }
}
