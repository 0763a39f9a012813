//! Tables and member I/O of an open archive
//!
//! [`OpenArchive`] owns the file, the header and both tables. Everything that
//! touches stored bytes goes through here; the public [`super::Archive`] type
//! adds lifecycle checks and handle bookkeeping on top.

use super::FileEntry;
use crate::compression;
use crate::crypto::{
    BLOCK_TABLE_KEY, HASH_TABLE_KEY, NameHashes, decrypt_bytes, detect_file_key, encrypt_bytes,
    file_key,
};
use crate::handle::{MemberRef, OpenFile};
use crate::header::{ArchiveHeader, UserDataHeader, find_header};
use crate::options::{AddFileOptions, LocaleFallback, OpenFileOptions, OpenOptions};
use crate::path::{parse_pseudo_name, pseudo_name, validate_name};
use crate::sector::{
    FileLayout, SectorEncoding, decode_sector, encode_file, parse_checksums, parse_offset_table,
    rekey,
};
use crate::special_files::{
    ATTRIBUTES, AttributeFlags, Attributes, FileAttributes, LISTFILE, PATCH_METADATA, SIGNATURE, USER_DATA,
    build_listfile, filetime_from_datetime, is_special_file, parse_listfile,
};
use crate::tables::{
    BLOCK_ENTRY_SIZE, BlockEntry, BlockFlags, BlockTable, HASH_ENTRY_SIZE, HashDirectory,
    HashEntry, LOCALE_NEUTRAL, MAX_HASH_TABLE_SIZE,
};
use crate::verify::{VerifyFlags, VerifyResult};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Everything that exists only while an archive is open
#[derive(Debug)]
pub(super) struct OpenArchive {
    pub(super) file: Mutex<File>,
    pub(super) read_only: bool,
    /// Offset of the MPQ header within the file
    pub(super) archive_offset: u64,
    pub(super) user_data: Option<UserDataHeader>,
    pub(super) header: ArchiveHeader,
    pub(super) hashes: HashDirectory,
    pub(super) blocks: BlockTable,
    /// Known names keyed by their two name hashes
    pub(super) names: HashMap<(u32, u32), String>,
    /// Loaded (attributes); `None` leaves the stored file alone
    pub(super) attributes: Option<Attributes>,
    /// Rewrite (listfile) on flush
    pub(super) listfile: bool,
    pub(super) dirty: bool,
    pub(super) check_sector_crc: bool,
    pub(super) locale: u16,
    /// Blocks freed or re-keyed since the handles last caught up
    pub(super) retired: Vec<u32>,
}

/// Read a table, undoing the compression some writers apply
///
/// The returned bytes are encrypted the way uncompressed tables are stored,
/// so the table parsers see one format.
fn read_table(file: &mut File, pos: u64, stored: u64, expected: usize, key: u32) -> Result<Vec<u8>> {
    let stored = usize::try_from(stored)
        .map_err(|_| Error::invalid_format(format!("table size {stored} is too large")))?;
    let mut data = vec![0u8; stored];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut data)?;

    if stored >= expected {
        data.truncate(expected);
        return Ok(data);
    }
    if data.is_empty() {
        return Err(Error::invalid_format("compressed table is empty"));
    }

    decrypt_bytes(&mut data, key);
    let mut table = compression::decompress(&data[1..], data[0], expected)?;
    if table.len() != expected {
        return Err(Error::invalid_format(format!(
            "table decompressed to {} bytes, expected {expected}",
            table.len()
        )));
    }
    encrypt_bytes(&mut table, key);
    Ok(table)
}

/// Write both tables after the data and the header in front of it
///
/// `table_pos` is relative to the archive offset. The file is truncated
/// after the last table.
pub(super) fn write_tables(
    file: &mut File,
    archive_offset: u64,
    header: &mut ArchiveHeader,
    hashes: &HashDirectory,
    blocks: &BlockTable,
    table_pos: u64,
) -> Result<()> {
    let hash_bytes = hashes.to_bytes()?;
    let (block_bytes, hi_block) = blocks.to_bytes()?;
    if hi_block.is_some() && !header.format_version.supports_hi_block() {
        return Err(Error::unsupported(format!(
            "{:?} archives cannot hold data beyond 4 GiB",
            header.format_version
        )));
    }

    header.hash_table_pos = table_pos;
    header.hash_table_size = hashes.size();
    header.block_table_pos = table_pos + hash_bytes.len() as u64;
    header.block_table_size = blocks.len() as u32;
    let mut end = header.block_table_pos + block_bytes.len() as u64;
    header.hi_block_table_pos = match &hi_block {
        Some(hi) => {
            let pos = end;
            end += hi.len() as u64;
            pos
        }
        None => 0,
    };
    header.het_table_pos = 0;
    header.bet_table_pos = 0;
    header.archive_size = end;
    if let Some(v4) = header.v4.as_mut() {
        v4.het_table_size_64 = 0;
        v4.bet_table_size_64 = 0;
        v4.md5_het_table = [0; 16];
        v4.md5_bet_table = [0; 16];
    }
    header.seal_v4(&hash_bytes, &block_bytes, hi_block.as_deref().unwrap_or(&[]))?;

    file.seek(SeekFrom::Start(archive_offset + table_pos))?;
    file.write_all(&hash_bytes)?;
    file.write_all(&block_bytes)?;
    if let Some(hi) = &hi_block {
        file.write_all(hi)?;
    }
    file.seek(SeekFrom::Start(archive_offset))?;
    file.write_all(&header.to_bytes()?)?;
    file.set_len(archive_offset + end)?;
    file.flush()?;

    log::debug!(
        "Wrote {} hash slots and {} blocks at {table_pos:#x}",
        hashes.size(),
        blocks.len()
    );
    Ok(())
}

impl OpenArchive {
    /// Parse the header and tables of an existing archive
    pub(super) fn load(mut file: File, options: &OpenOptions) -> Result<Self> {
        let location = find_header(&mut file, options.header_search)?;
        let header = location.header;
        let base = location.archive_offset;

        let hash_bytes = read_table(
            &mut file,
            base + header.hash_table_pos,
            header.hash_table_stored_size(),
            header.hash_table_size as usize * HASH_ENTRY_SIZE,
            HASH_TABLE_KEY,
        )?;
        let mut hashes = HashDirectory::from_bytes(&hash_bytes, header.hash_table_size)?;

        let block_count = header.block_table_size as usize;
        let block_bytes = read_table(
            &mut file,
            base + header.block_table_pos,
            header.block_table_stored_size(),
            block_count * BLOCK_ENTRY_SIZE,
            BLOCK_TABLE_KEY,
        )?;
        let hi_block = if header.hi_block_table_pos != 0 && block_count > 0 {
            let mut data = vec![0u8; block_count * 2];
            file.seek(SeekFrom::Start(base + header.hi_block_table_pos))?;
            file.read_exact(&mut data)?;
            Some(data)
        } else {
            None
        };
        let blocks = BlockTable::from_bytes(&block_bytes, block_count, hi_block.as_deref())?;

        let dropped =
            hashes.retain_valid(|entry| blocks.get(entry.block_index).is_some_and(BlockEntry::exists));
        if dropped > 0 {
            log::warn!("Dropped {dropped} hash entries that point at missing blocks");
        }

        let mut state = Self {
            file: Mutex::new(file),
            read_only: options.read_only,
            archive_offset: base,
            user_data: location.user_data,
            header,
            hashes,
            blocks,
            names: HashMap::new(),
            attributes: None,
            listfile: false,
            dirty: false,
            retired: Vec::new(),
            check_sector_crc: options.check_sector_crc,
            locale: options.locale,
        };

        for name in [LISTFILE, ATTRIBUTES, SIGNATURE, USER_DATA, PATCH_METADATA] {
            state.register_name(name);
        }

        if options.load_listfile && state.has_member(LISTFILE) {
            match state.read_named(LISTFILE).and_then(|data| parse_listfile(&data)) {
                Ok(names) => {
                    let matched = names.iter().filter(|name| state.register_name(name)).count();
                    log::debug!("Matched {matched} of {} (listfile) names", names.len());
                    state.listfile = true;
                }
                Err(e) => log::warn!("Failed to load (listfile): {e}"),
            }
        }

        if options.load_attributes && state.has_member(ATTRIBUTES) {
            match state
                .read_named(ATTRIBUTES)
                .and_then(|data| Attributes::parse(&data, state.blocks.len()))
            {
                Ok(attributes) => state.attributes = Some(attributes),
                Err(e) => log::warn!("Failed to load (attributes): {e}"),
            }
        }

        log::debug!(
            "Loaded archive at offset {base:#x}: {:?}, {} hash slots, {} blocks",
            state.header.format_version,
            state.hashes.size(),
            state.blocks.len()
        );
        Ok(state)
    }

    /// First byte available for member data
    pub(super) fn data_start(&self) -> u64 {
        self.header
            .header_size
            .max(self.header.format_version.header_size()) as u64
    }

    pub(super) fn sector_size(&self) -> u32 {
        self.header.sector_size()
    }

    pub(super) fn read_at(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.archive_offset + pos))?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let offset = self.archive_offset + pos;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Learn a name; returns whether any live entry carries it
    pub(super) fn register_name(&mut self, name: &str) -> bool {
        let Ok(name) = validate_name(name) else {
            return false;
        };
        let hashes = NameHashes::new(&name);
        if self.hashes.find_all(&hashes).is_empty() {
            return false;
        }
        self.names.insert((hashes.name_a, hashes.name_b), name);
        true
    }

    /// Drop a name once no entry uses its hashes
    fn forget_name(&mut self, name_a: u32, name_b: u32) {
        let in_use = self
            .hashes
            .occupied()
            .any(|(_, e)| e.name_a == name_a && e.name_b == name_b);
        if !in_use {
            self.names.remove(&(name_a, name_b));
        }
    }

    pub(super) fn name_of(&self, entry: &HashEntry) -> Option<&str> {
        self.names
            .get(&(entry.name_a, entry.name_b))
            .map(String::as_str)
    }

    pub(super) fn has_member(&self, name: &str) -> bool {
        !self.hashes.find_all(&NameHashes::new(name)).is_empty()
    }

    /// Listing entry for an occupied hash slot
    pub(super) fn file_entry(&self, entry: &HashEntry) -> Option<FileEntry> {
        let block = self.blocks.get(entry.block_index)?;
        if !block.exists() || block.flags.contains(BlockFlags::DELETE_MARKER) {
            return None;
        }
        let (name, name_known) = match self.name_of(entry) {
            Some(name) => (name.to_string(), true),
            None => (pseudo_name(entry.block_index), false),
        };
        Some(FileEntry {
            name,
            name_known,
            block_index: entry.block_index,
            locale: entry.locale,
            platform: entry.platform,
            file_pos: block.file_pos,
            file_size: block.file_size,
            compressed_size: block.compressed_size,
            flags: block.flags,
        })
    }

    /// Find a member by name, falling back to `File########.xxx` names
    pub(super) fn resolve(&self, name: &str, options: OpenFileOptions) -> Result<MemberRef> {
        let name = validate_name(name)?;
        let hashes = NameHashes::new(&name);
        let locale = options.locale.unwrap_or(self.locale);

        if let Some((slot, entry)) = self.hashes.lookup(&hashes, locale, options.fallback) {
            return Ok(MemberRef {
                name,
                name_known: true,
                slot: Some(slot),
                block_index: entry.block_index,
                locale: entry.locale,
                platform: entry.platform,
            });
        }

        match parse_pseudo_name(&name) {
            Some(index) => self.resolve_index(index),
            None => Err(Error::FileNotFound(name)),
        }
    }

    /// Find a member by block index
    pub(super) fn resolve_index(&self, block_index: u32) -> Result<MemberRef> {
        if !self.blocks.get(block_index).is_some_and(BlockEntry::exists) {
            return Err(Error::FileNotFound(pseudo_name(block_index)));
        }

        let occupant = self
            .hashes
            .occupied()
            .find(|(_, e)| e.block_index == block_index);
        let known = occupant.and_then(|(_, e)| self.name_of(e));
        Ok(MemberRef {
            name: known.map_or_else(|| pseudo_name(block_index), str::to_string),
            name_known: known.is_some(),
            slot: occupant.map(|(slot, _)| slot),
            block_index,
            locale: occupant.map_or(LOCALE_NEUTRAL, |(_, e)| e.locale),
            platform: occupant.map_or(0, |(_, e)| e.platform),
        })
    }

    /// Decryption key of a member
    ///
    /// Without a known name the key is recovered from the encrypted sector
    /// offset table, which only works for members that have one.
    pub(super) fn member_key(&self, member: &MemberRef, entry: &BlockEntry) -> Result<Option<u32>> {
        if !entry.is_encrypted() || entry.file_size == 0 {
            return Ok(None);
        }
        let fix_key = entry.flags.contains(BlockFlags::FIX_KEY);
        if member.name_known {
            return Ok(Some(file_key(&member.name, entry.file_pos, entry.file_size, fix_key)));
        }

        let layout = FileLayout::new(entry, self.sector_size());
        if layout.has_offset_table() && entry.compressed_size >= 8 {
            let raw = self.read_at(entry.file_pos, 8)?;
            let encrypted = [
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            ];
            if let Some(key) =
                detect_file_key(encrypted, self.sector_size(), layout.offset_table_size() as u32)
            {
                log::debug!("Recovered the key of block {}", member.block_index);
                return Ok(Some(key));
            }
        }

        Err(Error::unsupported(format!(
            "cannot recover the encryption key of {}",
            member.name
        )))
    }

    /// Read state for a resolved member
    pub(super) fn open_member(&self, member: MemberRef) -> Result<OpenFile> {
        let entry = self
            .blocks
            .get(member.block_index)
            .copied()
            .filter(BlockEntry::exists)
            .ok_or_else(|| Error::FileNotFound(member.name.clone()))?;
        if entry.flags.contains(BlockFlags::DELETE_MARKER) {
            return Err(Error::FileNotFound(member.name));
        }
        if entry.flags.contains(BlockFlags::PATCH_FILE) {
            return Err(Error::unsupported(format!(
                "{} is a patch file",
                member.name
            )));
        }

        let key = self.member_key(&member, &entry)?;
        let mut file = OpenFile::reader(member, entry, self.sector_size(), key);
        file.check_sector_crc = self.check_sector_crc;
        Ok(file)
    }

    fn ensure_offsets(&self, file: &mut OpenFile) -> Result<()> {
        if file.offsets.is_some() {
            return Ok(());
        }
        let offsets = if file.layout.has_offset_table() {
            let raw = self.read_at(file.entry.file_pos, file.layout.offset_table_size())?;
            parse_offset_table(&file.layout, &raw, file.key)?
        } else {
            file.layout.implicit_offsets()
        };
        file.offsets = Some(offsets);
        Ok(())
    }

    fn ensure_checksums(&self, file: &mut OpenFile) -> Result<()> {
        if file.checksums.is_some() || !file.layout.has_sector_crc() {
            return Ok(());
        }
        let count = file.layout.sector_count() as usize;
        let (start, end) = match file.offsets.as_deref() {
            Some(offsets) if offsets.len() > count + 1 => (offsets[count], offsets[count + 1]),
            _ => {
                log::warn!("{} has no room for sector checksums", file.member.name);
                file.checksums = Some(vec![0; count]);
                return Ok(());
            }
        };

        let raw = self.read_at(file.entry.file_pos + start as u64, (end - start) as usize)?;
        let checksums = parse_checksums(&file.layout, &raw).unwrap_or_else(|e| {
            log::warn!("Ignoring the sector checksums of {}: {e}", file.member.name);
            vec![0; count]
        });
        file.checksums = Some(checksums);
        Ok(())
    }

    fn load_sector(&self, file: &mut OpenFile, index: u32) -> Result<()> {
        if file.cached_sector == Some(index) {
            return Ok(());
        }
        self.ensure_offsets(file)?;
        if file.check_sector_crc {
            self.ensure_checksums(file)?;
        }

        let i = index as usize;
        let (start, end) = match file.offsets.as_deref() {
            Some(offsets) if i + 1 < offsets.len() => (offsets[i], offsets[i + 1]),
            _ => {
                return Err(Error::corrupt_sector(
                    file.member.name.as_str(),
                    index,
                    "sector is missing from the offset table",
                ));
            }
        };
        let raw = self.read_at(file.entry.file_pos + start as u64, (end - start) as usize)?;
        let checksum = if file.check_sector_crc {
            file.checksums.as_ref().and_then(|c| c.get(i).copied())
        } else {
            None
        };

        let data = decode_sector(&file.layout, &file.member.name, index, raw, file.key, checksum)?;
        file.cached_sector = Some(index);
        file.cached_data = data;
        Ok(())
    }

    /// Read from the current position of a read handle
    pub(super) fn read_into(&self, file: &mut OpenFile, buf: &mut [u8]) -> Result<usize> {
        if file.is_writer() {
            return Err(Error::invalid_argument("handle was opened for writing"));
        }

        let size = file.size();
        let mut done = 0;
        while done < buf.len() && file.position < size {
            let index = file.layout.sector_for_position(file.position);
            self.load_sector(file, index)?;
            let offset = (file.position - file.layout.sector_start(index)) as usize;
            let available = &file.cached_data[offset..];
            let n = available.len().min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&available[..n]);
            done += n;
            file.position += n as u64;
        }
        Ok(done)
    }

    /// Read a whole member from the start
    pub(super) fn read_all(&self, file: &mut OpenFile) -> Result<Vec<u8>> {
        file.position = 0;
        let mut data = vec![0u8; file.entry.file_size as usize];
        let read = self.read_into(file, &mut data)?;
        data.truncate(read);
        Ok(data)
    }

    pub(super) fn read_member(&self, member: MemberRef) -> Result<Vec<u8>> {
        let mut file = self.open_member(member)?;
        self.read_all(&mut file)
    }

    pub(super) fn read_named(&self, name: &str) -> Result<Vec<u8>> {
        let member = self.resolve(name, OpenFileOptions::new().fallback(LocaleFallback::Any))?;
        self.read_member(member)
    }

    /// Check one member against its sector checksums and (attributes)
    pub(super) fn verify_member(&self, member: MemberRef, flags: VerifyFlags) -> VerifyResult {
        let mut result = VerifyResult::empty();
        let block_index = member.block_index;
        let Ok(mut file) = self.open_member(member) else {
            return VerifyResult::OPEN_ERROR;
        };

        file.check_sector_crc =
            flags.contains(VerifyFlags::SECTOR_CRC) && file.layout.has_sector_crc();
        if file.check_sector_crc {
            result |= VerifyResult::HAS_SECTOR_CRC;
        }

        let data = match self.read_all(&mut file) {
            Ok(data) => data,
            Err(Error::SectorChecksum { .. }) => {
                result |= VerifyResult::SECTOR_CRC_ERROR;
                file.check_sector_crc = false;
                file.cached_sector = None;
                match self.read_all(&mut file) {
                    Ok(data) => data,
                    Err(_) => return result | VerifyResult::READ_ERROR,
                }
            }
            Err(_) => return result | VerifyResult::READ_ERROR,
        };

        let Some(attributes) = &self.attributes else {
            return result;
        };
        let Some(stored) = attributes.get(block_index) else {
            return result;
        };
        let computed = FileAttributes::compute(&data, 0);
        let recorded = attributes.flags;

        if flags.contains(VerifyFlags::FILE_CRC)
            && recorded.contains(AttributeFlags::CRC32)
            && stored.crc32 != 0
        {
            result |= VerifyResult::HAS_CHECKSUM;
            if stored.crc32 != computed.crc32 {
                result |= VerifyResult::CHECKSUM_ERROR;
            }
        }
        if flags.contains(VerifyFlags::FILE_MD5)
            && recorded.contains(AttributeFlags::MD5)
            && stored.md5 != [0; 16]
        {
            result |= VerifyResult::HAS_MD5;
            if stored.md5 != computed.md5 {
                result |= VerifyResult::MD5_ERROR;
            }
        }
        result
    }

    /// Encode and store a member, replacing an entry with the same name and locale
    ///
    /// Returns the block index. The new data is placed before the old entry
    /// is released, so a failed write leaves the old member readable.
    pub(super) fn write_member(
        &mut self,
        name: &str,
        data: &[u8],
        options: &AddFileOptions,
        track_attributes: bool,
    ) -> Result<u32> {
        let name = validate_name(name)?;
        let locale = options.locale.unwrap_or(self.locale);
        let hashes = NameHashes::new(&name);
        let existing = self.hashes.find_exact(&hashes, locale);
        if existing.is_some() && !options.replace_existing {
            return Err(Error::DuplicateFile(name));
        }

        let (compression, compression_next) = options.masks()?;
        let encoding = SectorEncoding {
            sector_size: self.sector_size(),
            flags: options.block_flags(),
            compression,
            compression_next,
            adpcm_level: options.adpcm_level,
        };
        let encoded = encode_file(data, &encoding)?;

        if existing.is_none() {
            self.ensure_capacity()?;
        }

        let compressed_size = encoded.compressed_size();
        let file_pos = self
            .blocks
            .allocate(compressed_size as u64, self.data_start());
        let flags = encoded.flags;
        let file_size = encoded.file_size;
        let key = flags.contains(BlockFlags::ENCRYPTED).then(|| {
            file_key(&name, file_pos, file_size, flags.contains(BlockFlags::FIX_KEY))
        });
        let bytes = encoded.into_bytes(key);
        self.write_at(file_pos, &bytes)?;

        if let Some((slot, _)) = existing {
            self.remove_slot(slot)?;
        }
        let block_index = self.blocks.insert(BlockEntry {
            file_pos,
            compressed_size,
            file_size,
            flags,
        });
        if let Err(e) = self
            .hashes
            .insert(&hashes, locale, options.platform, block_index)
        {
            self.blocks.free(block_index)?;
            return Err(e);
        }
        self.names.insert((hashes.name_a, hashes.name_b), name.clone());

        if track_attributes {
            if let Some(attributes) = self.attributes.as_mut() {
                let filetime = filetime_from_datetime(options.file_time.unwrap_or_else(Utc::now));
                attributes.set(block_index, FileAttributes::compute(data, filetime));
            }
        }

        self.dirty = true;
        log::debug!(
            "Stored {name} as block {block_index}: {file_size} -> {compressed_size} bytes at {file_pos:#x}"
        );
        Ok(block_index)
    }

    /// Remove the entry in a hash slot and release its block when unused
    pub(super) fn remove_slot(&mut self, slot: usize) -> Result<()> {
        let entry = self.hashes.remove(slot)?;
        let shared = self
            .hashes
            .occupied()
            .any(|(_, e)| e.block_index == entry.block_index);
        if !shared {
            self.blocks.free(entry.block_index)?;
            self.retired.push(entry.block_index);
            if let Some(attributes) = self.attributes.as_mut() {
                attributes.set(entry.block_index, FileAttributes::default());
            }
        }
        self.forget_name(entry.name_a, entry.name_b);
        self.dirty = true;
        Ok(())
    }

    /// Point a member at a new name, keeping its block
    ///
    /// Encrypted data is re-keyed in place when the key depends on the name.
    pub(super) fn rename_member(&mut self, member: &MemberRef, new_name: &str) -> Result<()> {
        let slot = member
            .slot
            .ok_or_else(|| Error::FileNotFound(member.name.clone()))?;
        let new_hashes = NameHashes::new(new_name);
        if self.hashes.find_exact(&new_hashes, member.locale).is_some() {
            return Err(Error::DuplicateFile(new_name.to_string()));
        }

        let entry = *self
            .blocks
            .get(member.block_index)
            .ok_or_else(|| Error::FileNotFound(member.name.clone()))?;
        if let Some(old_key) = self.member_key(member, &entry)? {
            let new_key = file_key(
                new_name,
                entry.file_pos,
                entry.file_size,
                entry.flags.contains(BlockFlags::FIX_KEY),
            );
            if new_key != old_key {
                let layout = FileLayout::new(&entry, self.sector_size());
                let mut stored = self.read_at(entry.file_pos, entry.compressed_size as usize)?;
                rekey(&layout, &mut stored, old_key, new_key)?;
                self.write_at(entry.file_pos, &stored)?;
            }
        }

        let old = self.hashes.remove(slot)?;
        self.retired.push(old.block_index);
        self.hashes
            .insert(&new_hashes, old.locale, old.platform, old.block_index)?;
        self.names
            .insert((new_hashes.name_a, new_hashes.name_b), new_name.to_string());
        self.forget_name(old.name_a, old.name_b);
        self.dirty = true;
        Ok(())
    }

    /// Rebuild the hash directory with `new_size` slots
    pub(super) fn rehash(&mut self, new_size: u32) -> Result<()> {
        let names = &self.names;
        let rebuilt = self.hashes.rehash(new_size, |entry| {
            names
                .get(&(entry.name_a, entry.name_b))
                .map(|name| NameHashes::new(name))
        })?;
        self.hashes = rebuilt;
        self.dirty = true;
        Ok(())
    }

    /// Grow the hash directory before it gets more than half full
    fn ensure_capacity(&mut self) -> Result<()> {
        let size = self.hashes.size();
        let live = self.hashes.live_count();
        if (live + 1) * 2 <= size as usize || size >= MAX_HASH_TABLE_SIZE {
            return Ok(());
        }

        match self.rehash((size * 2).min(MAX_HASH_TABLE_SIZE)) {
            Ok(()) => Ok(()),
            Err(Error::Unsupported(reason)) if live < size as usize => {
                log::warn!("Hash table stays at {size} slots: {reason}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Write special files, tables and header when anything changed
    pub(super) fn flush(&mut self) -> Result<()> {
        if self.read_only || !self.dirty {
            return Ok(());
        }

        self.blocks.trim();
        if self.listfile {
            self.write_listfile()?;
        }
        if self.attributes.is_some() {
            self.write_attributes()?;
        }

        let table_pos = self.blocks.end_of_data(self.data_start());
        let archive_offset = self.archive_offset;
        write_tables(
            self.file.get_mut(),
            archive_offset,
            &mut self.header,
            &self.hashes,
            &self.blocks,
            table_pos,
        )?;
        self.dirty = false;
        Ok(())
    }

    /// Remove a special file so it can be rewritten in place
    pub(super) fn drop_special(&mut self, name: &str) -> Result<()> {
        if let Some((slot, _)) = self
            .hashes
            .find_exact(&NameHashes::new(name), LOCALE_NEUTRAL)
        {
            self.remove_slot(slot)?;
        }
        Ok(())
    }

    fn write_listfile(&mut self) -> Result<()> {
        self.drop_special(LISTFILE)?;
        let names: Vec<&str> = self
            .hashes
            .occupied()
            .filter_map(|(_, entry)| self.name_of(entry))
            .filter(|name| !is_special_file(name))
            .collect();
        let data = build_listfile(names);

        let options = AddFileOptions::new().locale(LOCALE_NEUTRAL);
        self.write_member(LISTFILE, &data, &options, false)?;
        Ok(())
    }

    /// Rewrite (attributes) sized for the block table it will be part of
    fn write_attributes(&mut self) -> Result<()> {
        self.drop_special(ATTRIBUTES)?;
        self.blocks.trim();

        // the new block takes the first free entry, or a new one at the end
        let block_index = self
            .blocks
            .entries()
            .iter()
            .position(BlockEntry::is_free)
            .unwrap_or(self.blocks.len());
        let count = self.blocks.len().max(block_index + 1);

        let Some(attributes) = self.attributes.as_mut() else {
            return Ok(());
        };
        attributes.resize(count);
        attributes.set(block_index as u32, FileAttributes::default());
        let data = attributes.to_bytes();

        let options = AddFileOptions::new().locale(LOCALE_NEUTRAL);
        let written = self.write_member(ATTRIBUTES, &data, &options, false)?;
        if written as usize != block_index {
            log::warn!("(attributes) landed in block {written}, expected {block_index}");
        }
        Ok(())
    }
}
