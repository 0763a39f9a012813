//! MPQ header structures, parsing and header search

use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use md5::{Digest, Md5};
use std::io::{Read, Seek, SeekFrom, Write};

/// MPQ archive header signature ('MPQ\x1A')
pub const HEADER_SIGNATURE: u32 = 0x1A51_504D;

/// MPQ user data header signature ('MPQ\x1B')
pub const USER_DATA_SIGNATURE: u32 = 0x1B51_504D;

/// Headers only ever start on this alignment
pub const HEADER_ALIGNMENT: u64 = 0x200;

/// Bytes of a V4 header covered by its own MD5
const V4_HEADER_MD5_SPAN: usize = 0xC0;

/// MPQ format version
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FormatVersion {
    /// Version 1 - Original format (32-byte header)
    #[default]
    V1 = 0,
    /// Version 2 - Burning Crusade (44-byte header)
    V2 = 1,
    /// Version 3 - Cataclysm Beta (68-byte header)
    V3 = 2,
    /// Version 4 - Cataclysm+ (208-byte header)
    V4 = 3,
}

impl FormatVersion {
    /// Get the header size for this version
    pub fn header_size(self) -> u32 {
        match self {
            FormatVersion::V1 => 0x20,
            FormatVersion::V2 => 0x2C,
            FormatVersion::V3 => 0x44,
            FormatVersion::V4 => 0xD0,
        }
    }

    /// Create from the raw version number stored in the header
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(FormatVersion::V1),
            1 => Some(FormatVersion::V2),
            2 => Some(FormatVersion::V3),
            3 => Some(FormatVersion::V4),
            _ => None,
        }
    }

    /// The raw version number
    pub fn raw(self) -> u16 {
        self as u16
    }

    /// Check if the header can point at a hi-block table
    pub fn supports_hi_block(self) -> bool {
        self >= FormatVersion::V2
    }
}

/// MPQ user data header (optional, appears before the main header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDataHeader {
    /// Maximum size of the user data
    pub user_data_size: u32,
    /// Offset of the MPQ header, relative to the beginning of this header
    pub header_offset: u32,
    /// Size of the user data header
    pub user_data_header_size: u32,
}

/// Table sizes and digests added by version 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderV4 {
    /// Stored size of the hash table
    pub hash_table_size_64: u64,
    /// Stored size of the block table
    pub block_table_size_64: u64,
    /// Stored size of the hi-block table
    pub hi_block_table_size_64: u64,
    /// Stored size of the HET table
    pub het_table_size_64: u64,
    /// Stored size of the BET table
    pub bet_table_size_64: u64,
    /// Size of the raw data chunks hashed for file MD5s
    pub raw_chunk_size: u32,
    /// MD5 of the block table
    pub md5_block_table: [u8; 16],
    /// MD5 of the hash table
    pub md5_hash_table: [u8; 16],
    /// MD5 of the hi-block table
    pub md5_hi_block_table: [u8; 16],
    /// MD5 of the BET table
    pub md5_bet_table: [u8; 16],
    /// MD5 of the HET table
    pub md5_het_table: [u8; 16],
    /// MD5 of the header itself
    pub md5_header: [u8; 16],
}

/// Main MPQ header
///
/// Positions are relative to the start of the header. Fields that a version
/// does not store read as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Size of the header as stored
    pub header_size: u32,
    /// Size of the archive, 64-bit from V3 on
    pub archive_size: u64,
    /// Format version
    pub format_version: FormatVersion,
    /// Sector size exponent: sectors are `512 << shift` bytes
    pub sector_size_shift: u16,
    /// Offset of the hash table
    pub hash_table_pos: u64,
    /// Offset of the block table
    pub block_table_pos: u64,
    /// Number of hash table entries
    pub hash_table_size: u32,
    /// Number of block table entries
    pub block_table_size: u32,
    /// Offset of the hi-block table (V2+), 0 when absent
    pub hi_block_table_pos: u64,
    /// Offset of the HET table (V3+), 0 when absent
    pub het_table_pos: u64,
    /// Offset of the BET table (V3+), 0 when absent
    pub bet_table_pos: u64,
    /// Version 4 extension
    pub v4: Option<HeaderV4>,
}

impl ArchiveHeader {
    /// Header of a new, empty archive
    pub fn new(format_version: FormatVersion, sector_size_shift: u16, hash_table_size: u32) -> Self {
        let header_size = format_version.header_size();
        Self {
            header_size,
            archive_size: header_size as u64,
            format_version,
            sector_size_shift,
            hash_table_pos: header_size as u64,
            block_table_pos: header_size as u64,
            hash_table_size,
            block_table_size: 0,
            hi_block_table_pos: 0,
            het_table_pos: 0,
            bet_table_pos: 0,
            v4: (format_version == FormatVersion::V4).then(|| HeaderV4 {
                raw_chunk_size: 0x4000,
                ..HeaderV4::default()
            }),
        }
    }

    /// Sector size in bytes
    pub fn sector_size(&self) -> u32 {
        crate::calculate_sector_size(self.sector_size_shift)
    }

    /// Check if the archive only carries HET/BET tables
    pub fn is_het_bet_only(&self) -> bool {
        self.hash_table_size == 0
            && self.block_table_size == 0
            && (self.het_table_pos != 0 || self.bet_table_pos != 0)
    }

    /// Stored byte size of the hash table
    pub fn hash_table_stored_size(&self) -> u64 {
        match &self.v4 {
            Some(v4) if v4.hash_table_size_64 != 0 => v4.hash_table_size_64,
            _ => self.hash_table_size as u64 * 16,
        }
    }

    /// Stored byte size of the block table
    pub fn block_table_stored_size(&self) -> u64 {
        match &self.v4 {
            Some(v4) if v4.block_table_size_64 != 0 => v4.block_table_size_64,
            _ => self.block_table_size as u64 * 16,
        }
    }

    /// Read a header, starting at its signature
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != HEADER_SIGNATURE {
            return Err(Error::invalid_format(format!(
                "invalid header signature 0x{signature:08X}"
            )));
        }

        let header_size = reader.read_u32::<LittleEndian>()?;
        let archive_size = reader.read_u32::<LittleEndian>()?;
        let version_raw = reader.read_u16::<LittleEndian>()?;
        let sector_size_shift = reader.read_u16::<LittleEndian>()?;
        let hash_table_pos = reader.read_u32::<LittleEndian>()?;
        let block_table_pos = reader.read_u32::<LittleEndian>()?;
        let hash_table_size = reader.read_u32::<LittleEndian>()?;
        let block_table_size = reader.read_u32::<LittleEndian>()?;

        let format_version =
            FormatVersion::from_raw(version_raw).ok_or(Error::UnsupportedVersion(version_raw))?;
        if header_size < format_version.header_size() {
            return Err(Error::invalid_format(format!(
                "header size {header_size} too small for version {format_version:?}"
            )));
        }
        if sector_size_shift > crate::MAX_SECTOR_SIZE_SHIFT {
            return Err(Error::invalid_format(format!(
                "sector size shift {sector_size_shift} out of range"
            )));
        }

        let mut header = Self {
            header_size,
            archive_size: archive_size as u64,
            format_version,
            sector_size_shift,
            hash_table_pos: hash_table_pos as u64,
            block_table_pos: block_table_pos as u64,
            hash_table_size,
            block_table_size,
            hi_block_table_pos: 0,
            het_table_pos: 0,
            bet_table_pos: 0,
            v4: None,
        };

        if format_version >= FormatVersion::V2 {
            header.hi_block_table_pos = reader.read_u64::<LittleEndian>()?;
            header.hash_table_pos |= (reader.read_u16::<LittleEndian>()? as u64) << 32;
            header.block_table_pos |= (reader.read_u16::<LittleEndian>()? as u64) << 32;
        }

        if format_version >= FormatVersion::V3 {
            let archive_size_64 = reader.read_u64::<LittleEndian>()?;
            if archive_size_64 != 0 {
                header.archive_size = archive_size_64;
            }
            header.bet_table_pos = reader.read_u64::<LittleEndian>()?;
            header.het_table_pos = reader.read_u64::<LittleEndian>()?;
        }

        if format_version >= FormatVersion::V4 {
            let mut v4 = HeaderV4 {
                hash_table_size_64: reader.read_u64::<LittleEndian>()?,
                block_table_size_64: reader.read_u64::<LittleEndian>()?,
                hi_block_table_size_64: reader.read_u64::<LittleEndian>()?,
                het_table_size_64: reader.read_u64::<LittleEndian>()?,
                bet_table_size_64: reader.read_u64::<LittleEndian>()?,
                raw_chunk_size: reader.read_u32::<LittleEndian>()?,
                ..HeaderV4::default()
            };
            reader.read_exact(&mut v4.md5_block_table)?;
            reader.read_exact(&mut v4.md5_hash_table)?;
            reader.read_exact(&mut v4.md5_hi_block_table)?;
            reader.read_exact(&mut v4.md5_bet_table)?;
            reader.read_exact(&mut v4.md5_het_table)?;
            reader.read_exact(&mut v4.md5_header)?;
            header.v4 = Some(v4);
        }

        Ok(header)
    }

    /// Serialize the header in the layout of its version
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let size = self.format_version.header_size();
        let mut out = Vec::with_capacity(size as usize);

        out.write_u32::<LittleEndian>(HEADER_SIGNATURE)?;
        out.write_u32::<LittleEndian>(size)?;
        out.write_u32::<LittleEndian>(self.archive_size.min(u32::MAX as u64) as u32)?;
        out.write_u16::<LittleEndian>(self.format_version.raw())?;
        out.write_u16::<LittleEndian>(self.sector_size_shift)?;
        out.write_u32::<LittleEndian>(self.hash_table_pos as u32)?;
        out.write_u32::<LittleEndian>(self.block_table_pos as u32)?;
        out.write_u32::<LittleEndian>(self.hash_table_size)?;
        out.write_u32::<LittleEndian>(self.block_table_size)?;

        if self.format_version >= FormatVersion::V2 {
            out.write_u64::<LittleEndian>(self.hi_block_table_pos)?;
            out.write_u16::<LittleEndian>(high_word(self.hash_table_pos)?)?;
            out.write_u16::<LittleEndian>(high_word(self.block_table_pos)?)?;
        } else if self.hash_table_pos > u32::MAX as u64 || self.block_table_pos > u32::MAX as u64 {
            return Err(Error::unsupported(
                "format version 1 cannot place tables beyond 4 GiB",
            ));
        }

        if self.format_version >= FormatVersion::V3 {
            out.write_u64::<LittleEndian>(self.archive_size)?;
            out.write_u64::<LittleEndian>(self.bet_table_pos)?;
            out.write_u64::<LittleEndian>(self.het_table_pos)?;
        }

        if self.format_version >= FormatVersion::V4 {
            let v4 = self.v4.unwrap_or_default();
            out.write_u64::<LittleEndian>(v4.hash_table_size_64)?;
            out.write_u64::<LittleEndian>(v4.block_table_size_64)?;
            out.write_u64::<LittleEndian>(v4.hi_block_table_size_64)?;
            out.write_u64::<LittleEndian>(v4.het_table_size_64)?;
            out.write_u64::<LittleEndian>(v4.bet_table_size_64)?;
            out.write_u32::<LittleEndian>(v4.raw_chunk_size)?;
            out.write_all(&v4.md5_block_table)?;
            out.write_all(&v4.md5_hash_table)?;
            out.write_all(&v4.md5_hi_block_table)?;
            out.write_all(&v4.md5_bet_table)?;
            out.write_all(&v4.md5_het_table)?;
            out.write_all(&v4.md5_header)?;
        }

        Ok(out)
    }

    /// Record the stored tables in the V4 extension and seal the header MD5
    ///
    /// Does nothing for older versions.
    pub fn seal_v4(&mut self, hash_table: &[u8], block_table: &[u8], hi_block: &[u8]) -> Result<()> {
        let Some(v4) = self.v4.as_mut() else {
            return Ok(());
        };
        v4.hash_table_size_64 = hash_table.len() as u64;
        v4.block_table_size_64 = block_table.len() as u64;
        v4.hi_block_table_size_64 = hi_block.len() as u64;
        v4.md5_hash_table = md5_of(hash_table);
        v4.md5_block_table = md5_of(block_table);
        v4.md5_hi_block_table = if hi_block.is_empty() {
            [0; 16]
        } else {
            md5_of(hi_block)
        };

        let bytes = self.to_bytes()?;
        if let Some(v4) = self.v4.as_mut() {
            v4.md5_header = md5_of(&bytes[..V4_HEADER_MD5_SPAN]);
        }
        Ok(())
    }

    /// Check the V4 header digest against the header bytes as stored
    ///
    /// Returns `None` for versions without digests.
    pub fn verify_header_md5(&self, raw_header: &[u8]) -> Option<bool> {
        let v4 = self.v4.as_ref()?;
        Some(
            raw_header.len() >= V4_HEADER_MD5_SPAN
                && md5_of(&raw_header[..V4_HEADER_MD5_SPAN]) == v4.md5_header,
        )
    }

    /// Check that both tables lie within `available` bytes after the header
    pub fn tables_fit(&self, available: u64) -> bool {
        let fits = |pos: u64, size: u64| pos.checked_add(size).is_some_and(|end| end <= available);
        fits(self.hash_table_pos, self.hash_table_stored_size())
            && fits(self.block_table_pos, self.block_table_stored_size())
            && crate::is_power_of_two(self.hash_table_size)
    }
}

fn high_word(pos: u64) -> Result<u16> {
    u16::try_from(pos >> 32)
        .map_err(|_| Error::invalid_format(format!("table offset {pos:#x} exceeds 48 bits")))
}

/// MD5 digest of a byte slice
pub(crate) fn md5_of(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// Where the header of an archive was found
#[derive(Debug, Clone)]
pub struct HeaderLocation {
    /// Offset of the MPQ header in the file
    pub archive_offset: u64,
    /// User data header that redirected to it, if any
    pub user_data: Option<UserDataHeader>,
    /// The header itself
    pub header: ArchiveHeader,
}

/// Find the MPQ header in a file
///
/// Offset 0 is tried first. With `search` the file is then scanned
/// backwards from the last 512-byte boundary, so an archive appended to
/// another file is found. A candidate only counts when its tables fit inside
/// the file. When no candidate is accepted but one carried a signature with
/// malformed fields, the first such format error is returned.
pub fn find_header<R: Read + Seek>(reader: &mut R, search: bool) -> Result<HeaderLocation> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let mut rejected = None;

    if let Some(found) = try_header_at(reader, 0, file_size, &mut rejected)? {
        return Ok(found);
    }

    if search && file_size > 0 {
        let mut offset = ((file_size - 1) / HEADER_ALIGNMENT) * HEADER_ALIGNMENT;
        while offset > 0 {
            if let Some(found) = try_header_at(reader, offset, file_size, &mut rejected)? {
                log::debug!("Found MPQ header at offset {offset:#x}");
                return Ok(found);
            }
            offset -= HEADER_ALIGNMENT;
        }
    }

    if let Some(error) = rejected {
        return Err(error);
    }
    Err(Error::NotAnArchive(if search {
        "no MPQ header found".to_string()
    } else {
        "no MPQ header at offset 0".to_string()
    }))
}

fn try_header_at<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    file_size: u64,
    rejected: &mut Option<Error>,
) -> Result<Option<HeaderLocation>> {
    if offset + 32 > file_size {
        return Ok(None);
    }

    reader.seek(SeekFrom::Start(offset))?;
    let signature = reader.read_u32::<LittleEndian>()?;
    match signature {
        HEADER_SIGNATURE => {
            Ok(read_candidate(reader, offset, file_size, rejected)?.map(|header| HeaderLocation {
                archive_offset: offset,
                user_data: None,
                header,
            }))
        }
        USER_DATA_SIGNATURE => {
            let user_data = UserDataHeader {
                user_data_size: reader.read_u32::<LittleEndian>()?,
                header_offset: reader.read_u32::<LittleEndian>()?,
                user_data_header_size: reader.read_u32::<LittleEndian>()?,
            };
            let target = offset + user_data.header_offset as u64;
            if user_data.header_offset == 0 || target + 32 > file_size {
                return Ok(None);
            }
            reader.seek(SeekFrom::Start(target))?;
            if reader.read_u32::<LittleEndian>()? != HEADER_SIGNATURE {
                return Ok(None);
            }
            Ok(read_candidate(reader, target, file_size, rejected)?.map(|header| HeaderLocation {
                archive_offset: target,
                user_data: Some(user_data),
                header,
            }))
        }
        _ => Ok(None),
    }
}

fn read_candidate<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    file_size: u64,
    rejected: &mut Option<Error>,
) -> Result<Option<ArchiveHeader>> {
    reader.seek(SeekFrom::Start(offset))?;
    let header = match ArchiveHeader::read(reader) {
        Ok(header) => header,
        Err(Error::UnsupportedVersion(version)) => {
            log::debug!("Skipping header with unknown version {version} at {offset:#x}");
            return Ok(None);
        }
        Err(Error::Io(_)) => return Ok(None),
        Err(e @ Error::InvalidFormat(_)) => {
            log::debug!("Skipping header at {offset:#x}: {e}");
            rejected.get_or_insert(e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if header.is_het_bet_only() {
        return Err(Error::unsupported(
            "archives with only HET/BET tables are not supported",
        ));
    }
    if !header.tables_fit(file_size - offset) {
        log::debug!("Header at {offset:#x} has tables outside the file, ignoring");
        return Ok(None);
    }
    Ok(Some(header))
}
