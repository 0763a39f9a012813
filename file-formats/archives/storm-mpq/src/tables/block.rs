//! Block table and the space allocator built on it

use crate::crypto::{BLOCK_TABLE_KEY, decrypt_block, encrypt_block};
use crate::{Error, Result};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Size of one block table entry on disk
pub const BLOCK_ENTRY_SIZE: usize = 16;

bitflags! {
    /// Flags of a block table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u32 {
        /// Sectors are PKWARE DCL streams without a method byte
        const IMPLODE = 0x0000_0100;
        /// Sectors carry a compression method byte
        const COMPRESS = 0x0000_0200;
        /// Sectors and offset table are encrypted
        const ENCRYPTED = 0x0001_0000;
        /// The key is adjusted by the block position and file size
        const FIX_KEY = 0x0002_0000;
        /// The member is a patch against a base archive
        const PATCH_FILE = 0x0010_0000;
        /// The member is stored as one unit instead of sectors
        const SINGLE_UNIT = 0x0100_0000;
        /// The member marks a deletion in a patch archive
        const DELETE_MARKER = 0x0200_0000;
        /// A sector checksum table follows the sectors
        const SECTOR_CRC = 0x0400_0000;
        /// The entry describes a live member
        const EXISTS = 0x8000_0000;
    }
}

impl BlockFlags {
    /// Check if sectors need decompression of either kind
    pub fn is_compressed(self) -> bool {
        self.intersects(Self::IMPLODE | Self::COMPRESS)
    }
}

/// One member's physical placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockEntry {
    /// Offset of the member data relative to the archive header
    pub file_pos: u64,
    /// Stored size, including offset and checksum tables
    pub compressed_size: u32,
    /// Size of the uncompressed member
    pub file_size: u32,
    /// Storage flags
    pub flags: BlockFlags,
}

impl BlockEntry {
    /// Check if the entry describes a live member
    pub fn exists(&self) -> bool {
        self.flags.contains(BlockFlags::EXISTS)
    }

    /// Check if the entry is unused and may be handed out again
    pub fn is_free(&self) -> bool {
        !self.exists()
    }

    /// End of the stored bytes, relative to the archive header
    pub fn end(&self) -> u64 {
        self.file_pos + self.compressed_size as u64
    }

    /// Check if the member data is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(BlockFlags::ENCRYPTED)
    }

    /// Check if the member is stored as a single unit
    pub fn is_single_unit(&self) -> bool {
        self.flags.contains(BlockFlags::SINGLE_UNIT)
    }
}

/// Block table with first-fit placement of new members
#[derive(Debug, Clone, Default)]
pub struct BlockTable {
    entries: Vec<BlockEntry>,
}

impl BlockTable {
    /// Create an empty block table
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an encrypted block table and its optional hi-block table
    pub fn from_bytes(data: &[u8], count: usize, hi_block: Option<&[u8]>) -> Result<Self> {
        let expected = count * BLOCK_ENTRY_SIZE;
        if data.len() < expected {
            return Err(Error::invalid_format(format!(
                "block table needs {expected} bytes, found {}",
                data.len()
            )));
        }

        let mut dwords: Vec<u32> = data[..expected]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        decrypt_block(&mut dwords, BLOCK_TABLE_KEY);

        let mut hi_cursor = match hi_block {
            Some(hi) if hi.len() < count * 2 => {
                return Err(Error::invalid_format("hi-block table is truncated"));
            }
            Some(hi) => Some(Cursor::new(hi)),
            None => None,
        };

        let mut entries = Vec::with_capacity(count);
        for raw in dwords.chunks_exact(4) {
            let high = match hi_cursor.as_mut() {
                Some(cursor) => cursor.read_u16::<LittleEndian>()? as u64,
                None => 0,
            };
            entries.push(BlockEntry {
                file_pos: (high << 32) | raw[0] as u64,
                compressed_size: raw[1],
                file_size: raw[2],
                flags: BlockFlags::from_bits_retain(raw[3]),
            });
        }

        Ok(Self { entries })
    }

    /// Serialize and encrypt the table
    ///
    /// The second value is the hi-block table, present only when some entry
    /// lies beyond 4 GiB.
    pub fn to_bytes(&self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let mut dwords = Vec::with_capacity(self.entries.len() * 4);
        for entry in &self.entries {
            dwords.extend_from_slice(&[
                entry.file_pos as u32,
                entry.compressed_size,
                entry.file_size,
                entry.flags.bits(),
            ]);
        }
        encrypt_block(&mut dwords, BLOCK_TABLE_KEY);

        let mut table = Vec::with_capacity(dwords.len() * 4);
        for dword in dwords {
            table.write_u32::<LittleEndian>(dword)?;
        }

        let hi_block = if self.needs_hi_block() {
            let mut hi = Vec::with_capacity(self.entries.len() * 2);
            for entry in &self.entries {
                let high = u16::try_from(entry.file_pos >> 32).map_err(|_| {
                    Error::invalid_format(format!("offset {:#x} exceeds 48 bits", entry.file_pos))
                })?;
                hi.write_u16::<LittleEndian>(high)?;
            }
            Some(hi)
        } else {
            None
        };

        Ok((table, hi_block))
    }

    /// Check if any entry needs the hi-block table
    pub fn needs_hi_block(&self) -> bool {
        self.entries.iter().any(|e| e.file_pos > u32::MAX as u64)
    }

    /// Number of entries, free ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entry
    pub fn get(&self, index: u32) -> Option<&BlockEntry> {
        self.entries.get(index as usize)
    }

    /// Get a mutable entry
    pub fn get_mut(&mut self, index: u32) -> Option<&mut BlockEntry> {
        self.entries.get_mut(index as usize)
    }

    /// All entries in index order
    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    /// Indices and entries of live members
    pub fn live(&self) -> impl Iterator<Item = (u32, &BlockEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.exists())
            .map(|(i, e)| (i as u32, e))
    }

    /// Number of live members
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.exists()).count()
    }

    /// Store an entry, reusing the first free one
    pub fn insert(&mut self, entry: BlockEntry) -> u32 {
        match self.entries.iter().position(BlockEntry::is_free) {
            Some(index) => {
                self.entries[index] = entry;
                index as u32
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as u32
            }
        }
    }

    /// Mark an entry unused; its bytes become a gap for later allocations
    pub fn free(&mut self, index: u32) -> Result<BlockEntry> {
        let entry = self
            .entries
            .get_mut(index as usize)
            .ok_or_else(|| Error::invalid_argument(format!("block index {index} out of range")))?;
        Ok(std::mem::take(entry))
    }

    /// Drop free entries at the end of the table
    pub fn trim(&mut self) {
        while self.entries.last().is_some_and(BlockEntry::is_free) {
            self.entries.pop();
        }
    }

    /// First byte past the last live member, never below `data_start`
    pub fn end_of_data(&self, data_start: u64) -> u64 {
        self.live()
            .map(|(_, e)| e.end())
            .fold(data_start, u64::max)
    }

    /// Choose where `size` bytes of member data go
    ///
    /// First fit over the gaps between live members starting at `data_start`;
    /// when no gap is large enough the data is appended after the last member.
    pub fn allocate(&self, size: u64, data_start: u64) -> u64 {
        let mut used: Vec<(u64, u64)> = self
            .live()
            .filter(|(_, e)| e.compressed_size > 0)
            .map(|(_, e)| (e.file_pos, e.end()))
            .collect();
        used.sort_unstable();

        let mut cursor = data_start;
        for (start, end) in used {
            if start >= cursor && start - cursor >= size {
                log::trace!("Allocated {size} bytes in gap at {cursor:#x}");
                return cursor;
            }
            cursor = cursor.max(end);
        }

        log::trace!("Allocated {size} bytes at end of data {cursor:#x}");
        cursor
    }

    /// Replace all entries, used when compaction renumbers the table
    pub fn replace_entries(&mut self, entries: Vec<BlockEntry>) {
        self.entries = entries;
    }
}
