//! Sector layout of stored members
//!
//! A member is stored in one of three shapes:
//!
//! - **Uncompressed**: consecutive sectors of `sector_size` bytes, the last
//!   one short.
//! - **Compressed or imploded**: a sector offset table of `n + 1` dwords
//!   (`n + 2` with a checksum table), the sectors, then the optional
//!   checksum table. Offsets are relative to the start of the member.
//! - **Single unit**: one blob holding the whole member.
//!
//! Encrypted sectors use `key + index`; the offset table uses `key - 1`.
//! The checksum table is never encrypted.

use crate::compression::{self, explode, implode};
use crate::crypto::{decrypt_bytes, encrypt_bytes};
use crate::tables::{BlockEntry, BlockFlags};
use crate::{Error, Result};
use adler2::Adler32;

/// How a member is laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLayout {
    /// Uncompressed size
    pub file_size: u32,
    /// Stored size
    pub compressed_size: u32,
    /// Sector size of the archive
    pub sector_size: u32,
    /// Block flags of the member
    pub flags: BlockFlags,
}

impl FileLayout {
    /// Layout of a block table entry
    pub fn new(entry: &BlockEntry, sector_size: u32) -> Self {
        Self {
            file_size: entry.file_size,
            compressed_size: entry.compressed_size,
            sector_size,
            flags: entry.flags,
        }
    }

    /// Check if the member is one blob
    pub fn is_single_unit(&self) -> bool {
        self.flags.contains(BlockFlags::SINGLE_UNIT)
    }

    /// Number of sectors holding data
    pub fn sector_count(&self) -> u32 {
        if self.file_size == 0 {
            0
        } else if self.is_single_unit() {
            1
        } else {
            self.file_size.div_ceil(self.sector_size)
        }
    }

    /// Check if the member starts with a sector offset table
    pub fn has_offset_table(&self) -> bool {
        self.flags.is_compressed() && !self.is_single_unit() && self.file_size > 0
    }

    /// Check if the member carries a sector checksum table
    pub fn has_sector_crc(&self) -> bool {
        self.has_offset_table() && self.flags.contains(BlockFlags::SECTOR_CRC)
    }

    /// Number of dwords in the sector offset table
    pub fn offset_table_entries(&self) -> usize {
        if !self.has_offset_table() {
            return 0;
        }
        self.sector_count() as usize + if self.has_sector_crc() { 2 } else { 1 }
    }

    /// Size in bytes of the sector offset table
    pub fn offset_table_size(&self) -> usize {
        self.offset_table_entries() * 4
    }

    /// Uncompressed size of sector `index`
    pub fn sector_plain_size(&self, index: u32) -> usize {
        if self.is_single_unit() {
            return self.file_size as usize;
        }
        let start = index as u64 * self.sector_size as u64;
        (self.file_size as u64)
            .saturating_sub(start)
            .min(self.sector_size as u64) as usize
    }

    /// Sector holding the uncompressed byte at `pos`
    pub fn sector_for_position(&self, pos: u64) -> u32 {
        if self.is_single_unit() {
            0
        } else {
            (pos / self.sector_size as u64) as u32
        }
    }

    /// Byte offset of the first byte of sector `index` in uncompressed data
    pub fn sector_start(&self, index: u32) -> u64 {
        if self.is_single_unit() {
            0
        } else {
            index as u64 * self.sector_size as u64
        }
    }

    /// Stored sector boundaries for members without an offset table
    pub fn implicit_offsets(&self) -> Vec<u32> {
        if self.file_size == 0 {
            return vec![0];
        }
        if self.is_single_unit() {
            return vec![0, self.compressed_size];
        }
        (0..=self.sector_count())
            .map(|i| (i as u64 * self.sector_size as u64).min(self.file_size as u64) as u32)
            .collect()
    }
}

/// Parse a stored sector offset table
///
/// `data` holds exactly [`FileLayout::offset_table_size`] bytes as read from
/// disk. With a key the table is decrypted with `key - 1`.
pub fn parse_offset_table(layout: &FileLayout, data: &[u8], key: Option<u32>) -> Result<Vec<u32>> {
    let expected = layout.offset_table_size();
    if data.len() != expected {
        return Err(Error::invalid_format(format!(
            "sector offset table is {} bytes, expected {expected}",
            data.len()
        )));
    }

    let mut table = data.to_vec();
    if let Some(key) = key {
        decrypt_bytes(&mut table, key.wrapping_sub(1));
    }

    let offsets: Vec<u32> = table
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if offsets[0] as usize != expected {
        return Err(Error::invalid_format(format!(
            "sector offset table starts at {}, expected {expected}",
            offsets[0]
        )));
    }
    if offsets.windows(2).any(|w| w[1] < w[0]) {
        return Err(Error::invalid_format("sector offsets are not ascending"));
    }
    if let Some(&last) = offsets.last() {
        if last > layout.compressed_size {
            return Err(Error::invalid_format(format!(
                "sector offsets end at {last}, past the stored size {}",
                layout.compressed_size
            )));
        }
    }

    Ok(offsets)
}

/// Parse the stored sector checksum table
///
/// A table shorter than one dword per sector was compressed with a method
/// byte in front.
pub fn parse_checksums(layout: &FileLayout, data: &[u8]) -> Result<Vec<u32>> {
    let count = layout.sector_count() as usize;
    let expected = count * 4;

    let table = if data.len() < expected && !data.is_empty() {
        compression::decompress(&data[1..], data[0], expected)?
    } else {
        data.to_vec()
    };
    if table.len() < expected {
        return Err(Error::invalid_format(format!(
            "sector checksum table holds {} bytes, expected {expected}",
            table.len()
        )));
    }

    Ok(table[..expected]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Checksum of one stored sector (Adler-32 seeded with 0)
pub fn sector_checksum(data: &[u8]) -> u32 {
    let mut adler = Adler32::from_checksum(0);
    adler.write_slice(data);
    adler.checksum()
}

/// Check if a stored checksum means "not computed"
pub fn checksum_is_absent(checksum: u32) -> bool {
    checksum == 0 || checksum == u32::MAX
}

/// Turn one stored sector back into plain bytes
///
/// `data` is the sector exactly as stored. `checksum`, when present and not
/// absent, is checked against the decrypted sector before decompression.
pub fn decode_sector(
    layout: &FileLayout,
    file_name: &str,
    index: u32,
    mut data: Vec<u8>,
    key: Option<u32>,
    checksum: Option<u32>,
) -> Result<Vec<u8>> {
    if let Some(key) = key {
        decrypt_bytes(&mut data, key.wrapping_add(index));
    }

    if let Some(expected) = checksum.filter(|&c| !checksum_is_absent(c)) {
        let actual = sector_checksum(&data);
        if actual != expected {
            return Err(Error::SectorChecksum {
                file: file_name.to_string(),
                sector: index,
                expected,
                actual,
            });
        }
    }

    let expected_size = layout.sector_plain_size(index);
    let plain = if !layout.flags.is_compressed() || data.len() == expected_size {
        if data.len() < expected_size {
            return Err(Error::corrupt_sector(
                file_name,
                index,
                format!("{} bytes stored, {expected_size} expected", data.len()),
            ));
        }
        data.truncate(expected_size);
        data
    } else if data.is_empty() {
        return Err(Error::corrupt_sector(file_name, index, "empty compressed sector"));
    } else if layout.flags.contains(BlockFlags::IMPLODE) {
        explode(&data, expected_size)
            .map_err(|e| Error::corrupt_sector(file_name, index, e.to_string()))?
    } else {
        compression::decompress(&data[1..], data[0], expected_size)
            .map_err(|e| Error::corrupt_sector(file_name, index, e.to_string()))?
    };

    if plain.len() != expected_size {
        return Err(Error::corrupt_sector(
            file_name,
            index,
            format!("decoded {} bytes, expected {expected_size}", plain.len()),
        ));
    }

    log::trace!("Decoded sector {index} of {file_name} ({expected_size} bytes)");
    Ok(plain)
}

/// Parameters for encoding a member
#[derive(Debug, Clone, Copy)]
pub struct SectorEncoding {
    /// Sector size of the archive
    pub sector_size: u32,
    /// Requested block flags (COMPRESS/IMPLODE, SINGLE_UNIT, SECTOR_CRC, ...)
    pub flags: BlockFlags,
    /// Compression mask for the first sector
    pub compression: u8,
    /// Compression mask for the remaining sectors
    pub compression_next: u8,
    /// ADPCM level for audio masks
    pub adpcm_level: u8,
}

/// A member encoded into sectors, not yet encrypted
#[derive(Debug, Clone)]
pub struct EncodedFile {
    /// Final block flags
    pub flags: BlockFlags,
    /// Uncompressed size
    pub file_size: u32,
    sectors: Vec<Vec<u8>>,
    checksums: Option<Vec<u32>>,
    has_offset_table: bool,
}

impl EncodedFile {
    /// Size of the stored member
    pub fn compressed_size(&self) -> u32 {
        let table = if self.has_offset_table {
            (self.sectors.len() + 1 + self.checksums.is_some() as usize) * 4
        } else {
            0
        };
        let sectors: usize = self.sectors.iter().map(Vec::len).sum();
        let checksums = self.checksums.as_ref().map_or(0, |c| c.len() * 4);
        (table + sectors + checksums) as u32
    }

    /// Number of encoded sectors
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Produce the bytes to store, encrypting with `key` when given
    pub fn into_bytes(self, key: Option<u32>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.compressed_size() as usize);

        if self.has_offset_table {
            let entries = self.sectors.len() + 1 + self.checksums.is_some() as usize;
            let mut offset = (entries * 4) as u32;
            let mut table = Vec::with_capacity(entries * 4);
            table.extend_from_slice(&offset.to_le_bytes());
            for sector in &self.sectors {
                offset += sector.len() as u32;
                table.extend_from_slice(&offset.to_le_bytes());
            }
            if let Some(checksums) = &self.checksums {
                offset += (checksums.len() * 4) as u32;
                table.extend_from_slice(&offset.to_le_bytes());
            }
            if let Some(key) = key {
                encrypt_bytes(&mut table, key.wrapping_sub(1));
            }
            out.extend_from_slice(&table);
        }

        for (i, mut sector) in self.sectors.into_iter().enumerate() {
            if let Some(key) = key {
                encrypt_bytes(&mut sector, key.wrapping_add(i as u32));
            }
            out.extend_from_slice(&sector);
        }

        if let Some(checksums) = self.checksums {
            for checksum in checksums {
                out.extend_from_slice(&checksum.to_le_bytes());
            }
        }

        out
    }
}

/// Split, compress and checksum a member
pub fn encode_file(data: &[u8], encoding: &SectorEncoding) -> Result<EncodedFile> {
    let file_size = u32::try_from(data.len())
        .map_err(|_| Error::invalid_argument("files larger than 4 GiB cannot be stored"))?;

    if data.is_empty() {
        return Ok(EncodedFile {
            flags: BlockFlags::EXISTS,
            file_size: 0,
            sectors: Vec::new(),
            checksums: None,
            has_offset_table: false,
        });
    }

    let mut flags = encoding.flags | BlockFlags::EXISTS;
    if flags.contains(BlockFlags::IMPLODE) {
        flags.remove(BlockFlags::COMPRESS);
    }

    let single_unit = flags.contains(BlockFlags::SINGLE_UNIT);
    let compressed = flags.is_compressed();
    if single_unit || !compressed {
        flags.remove(BlockFlags::SECTOR_CRC);
    }

    let chunk_size = if single_unit {
        data.len()
    } else {
        encoding.sector_size as usize
    };

    let mut sectors = Vec::with_capacity(data.len().div_ceil(chunk_size));
    for (i, chunk) in data.chunks(chunk_size).enumerate() {
        let stored = if !compressed {
            chunk.to_vec()
        } else if flags.contains(BlockFlags::IMPLODE) {
            let imploded = implode(chunk)?;
            if imploded.len() < chunk.len() {
                imploded
            } else {
                chunk.to_vec()
            }
        } else {
            let method = if i == 0 {
                encoding.compression
            } else {
                encoding.compression_next
            };
            compression::compress_with_level(chunk, method, encoding.adpcm_level)?
        };
        sectors.push(stored);
    }

    let checksums = flags
        .contains(BlockFlags::SECTOR_CRC)
        .then(|| sectors.iter().map(|s| sector_checksum(s)).collect());

    log::trace!(
        "Encoded {file_size} bytes into {} sectors (flags {:#010x})",
        sectors.len(),
        flags.bits()
    );

    Ok(EncodedFile {
        flags,
        file_size,
        sectors,
        checksums,
        has_offset_table: compressed && !single_unit,
    })
}

/// Re-encrypt a stored member from `old_key` to `new_key`
///
/// Used when a `FIX_KEY` member moves, since its key depends on its offset.
pub fn rekey(layout: &FileLayout, stored: &mut [u8], old_key: u32, new_key: u32) -> Result<()> {
    if old_key == new_key || layout.file_size == 0 {
        return Ok(());
    }

    let offsets = if layout.has_offset_table() {
        let table_size = layout.offset_table_size();
        if stored.len() < table_size {
            return Err(Error::invalid_format("member shorter than its offset table"));
        }
        let offsets = parse_offset_table(layout, &stored[..table_size], Some(old_key))?;
        decrypt_bytes(&mut stored[..table_size], old_key.wrapping_sub(1));
        encrypt_bytes(&mut stored[..table_size], new_key.wrapping_sub(1));
        offsets
    } else {
        layout.implicit_offsets()
    };

    for index in 0..layout.sector_count() {
        let start = offsets[index as usize] as usize;
        let end = offsets[index as usize + 1] as usize;
        let sector = stored.get_mut(start..end).ok_or_else(|| {
            Error::invalid_format(format!("sector {index} lies outside the member"))
        })?;
        decrypt_bytes(sector, old_key.wrapping_add(index));
        encrypt_bytes(sector, new_key.wrapping_add(index));
    }

    Ok(())
}
