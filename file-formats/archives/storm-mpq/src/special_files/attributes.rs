//! (attributes) file: per-block CRC32, file time, MD5 and patch bit

use crate::{Error, Result};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::io::{Cursor, Read};

bitflags! {
    /// Which arrays an (attributes) file carries
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttributeFlags: u32 {
        /// CRC32 of the uncompressed data
        const CRC32 = 0x0000_0001;
        /// Windows FILETIME of the member
        const FILETIME = 0x0000_0002;
        /// MD5 of the uncompressed data
        const MD5 = 0x0000_0004;
        /// One bit per block: member is a patch file
        const PATCH_BIT = 0x0000_0008;
    }
}

impl Default for AttributeFlags {
    fn default() -> Self {
        Self::CRC32 | Self::FILETIME | Self::MD5
    }
}

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i64 = 11_644_473_600;

/// Convert a UTC time to a Windows FILETIME
pub fn filetime_from_datetime(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp() + FILETIME_UNIX_EPOCH;
    if secs < 0 {
        return 0;
    }
    secs as u64 * 10_000_000 + (time.timestamp_subsec_nanos() / 100) as u64
}

/// Convert a Windows FILETIME to a UTC time
///
/// Zero means "not set" and yields `None`.
pub fn datetime_from_filetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let secs = (filetime / 10_000_000) as i64 - FILETIME_UNIX_EPOCH;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Attributes of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes {
    /// CRC32 of the uncompressed data, 0 when unknown
    pub crc32: u32,
    /// Windows FILETIME, 0 when unknown
    pub filetime: u64,
    /// MD5 of the uncompressed data, all zero when unknown
    pub md5: [u8; 16],
    /// Member is a patch file
    pub is_patch: bool,
}

impl FileAttributes {
    /// Compute the attributes of member data
    pub fn compute(data: &[u8], filetime: u64) -> Self {
        let mut crc = crc32fast::Hasher::new();
        crc.update(data);
        Self {
            crc32: crc.finalize(),
            filetime,
            md5: Md5::digest(data).into(),
            is_patch: false,
        }
    }
}

/// Parsed (attributes) file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    /// Arrays present in the file
    pub flags: AttributeFlags,
    entries: Vec<FileAttributes>,
}

impl Attributes {
    /// Version written in the file header
    pub const VERSION: u32 = 100;

    /// Empty attributes for `block_count` blocks
    pub fn new(flags: AttributeFlags, block_count: usize) -> Self {
        Self {
            flags,
            entries: vec![FileAttributes::default(); block_count],
        }
    }

    /// Parse an (attributes) file
    ///
    /// Older writers left out the entry of the (attributes) block itself, so
    /// arrays one entry short are accepted. A missing patch-bit array is
    /// tolerated as well.
    pub fn parse(data: &[u8], block_count: usize) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::invalid_format(
                "(attributes) too small for its header",
            ));
        }

        let mut cursor = Cursor::new(data);
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != Self::VERSION {
            return Err(Error::invalid_format(format!(
                "unsupported (attributes) version {version}"
            )));
        }
        let flags = AttributeFlags::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);

        let array_size = |count: usize, with_patch: bool| {
            let mut size = 8;
            if flags.contains(AttributeFlags::CRC32) {
                size += count * 4;
            }
            if flags.contains(AttributeFlags::FILETIME) {
                size += count * 8;
            }
            if flags.contains(AttributeFlags::MD5) {
                size += count * 16;
            }
            if with_patch && flags.contains(AttributeFlags::PATCH_BIT) {
                size += count.div_ceil(8);
            }
            size
        };

        let count = if data.len() >= array_size(block_count, false) {
            block_count
        } else if block_count > 0 && data.len() >= array_size(block_count - 1, false) {
            block_count - 1
        } else {
            return Err(Error::invalid_format(format!(
                "(attributes) is {} bytes, expected {}",
                data.len(),
                array_size(block_count, true)
            )));
        };

        let mut entries = vec![FileAttributes::default(); block_count];
        if flags.contains(AttributeFlags::CRC32) {
            for entry in &mut entries[..count] {
                entry.crc32 = cursor.read_u32::<LittleEndian>()?;
            }
        }
        if flags.contains(AttributeFlags::FILETIME) {
            for entry in &mut entries[..count] {
                entry.filetime = cursor.read_u64::<LittleEndian>()?;
            }
        }
        if flags.contains(AttributeFlags::MD5) {
            for entry in &mut entries[..count] {
                cursor.read_exact(&mut entry.md5)?;
            }
        }
        if flags.contains(AttributeFlags::PATCH_BIT) {
            let mut bits = vec![0u8; count.div_ceil(8)];
            if cursor.read_exact(&mut bits).is_ok() {
                for (i, entry) in entries[..count].iter_mut().enumerate() {
                    entry.is_patch = bits[i / 8] & (1 << (i % 8)) != 0;
                }
            } else {
                log::warn!("(attributes) patch bits are truncated, ignoring them");
            }
        }

        Ok(Self { flags, entries })
    }

    /// Serialize the attributes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + self.entries.len() * 28);
        data.extend_from_slice(&Self::VERSION.to_le_bytes());
        data.extend_from_slice(&self.flags.bits().to_le_bytes());

        if self.flags.contains(AttributeFlags::CRC32) {
            for entry in &self.entries {
                data.extend_from_slice(&entry.crc32.to_le_bytes());
            }
        }
        if self.flags.contains(AttributeFlags::FILETIME) {
            for entry in &self.entries {
                data.extend_from_slice(&entry.filetime.to_le_bytes());
            }
        }
        if self.flags.contains(AttributeFlags::MD5) {
            for entry in &self.entries {
                data.extend_from_slice(&entry.md5);
            }
        }
        if self.flags.contains(AttributeFlags::PATCH_BIT) {
            let mut bits = vec![0u8; self.entries.len().div_ceil(8)];
            for (i, entry) in self.entries.iter().enumerate() {
                if entry.is_patch {
                    bits[i / 8] |= 1 << (i % 8);
                }
            }
            data.extend_from_slice(&bits);
        }

        data
    }

    /// Number of blocks covered
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no block is covered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attributes of a block
    pub fn get(&self, block_index: u32) -> Option<&FileAttributes> {
        self.entries.get(block_index as usize)
    }

    /// Store the attributes of a block, growing the arrays when needed
    pub fn set(&mut self, block_index: u32, attributes: FileAttributes) {
        let index = block_index as usize;
        if index >= self.entries.len() {
            self.entries.resize(index + 1, FileAttributes::default());
        }
        self.entries[index] = attributes;
    }

    /// Match the arrays to the block table length
    pub fn resize(&mut self, block_count: usize) {
        self.entries.resize(block_count, FileAttributes::default());
    }

    /// Rebuild the arrays after blocks were renumbered
    ///
    /// `old_indices[new]` is the old index of each new block.
    pub fn reindex(&mut self, old_indices: &[u32]) {
        self.entries = old_indices
            .iter()
            .map(|&old| self.get(old).copied().unwrap_or_default())
            .collect();
    }
}
