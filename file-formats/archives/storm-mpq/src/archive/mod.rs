//! MPQ archive handling
//!
//! [`Archive`] is the entry point of the crate. It opens or creates an
//! archive file and offers both the whole-member operations (`read_file`,
//! `add_file`, `remove_file`, `rename_file`, `compact`) and the handle based
//! ones (`open_file`, `read`, `seek`, `create_file`, `write`, `finish`).
//!
//! Reads take `&self` and may run from several threads at once. Every
//! mutation takes `&mut self`. Changes are buffered in memory and written
//! by `flush`, `close` or when the archive is dropped.
//!
//! # Examples
//!
//! ```no_run
//! use storm_mpq::{AddFileOptions, Archive};
//!
//! let mut archive = Archive::create("patch.mpq", 64)?;
//! archive.add_file_data(b"hello", "docs\\readme.txt", AddFileOptions::new())?;
//! assert_eq!(archive.read_file("docs/readme.txt")?, b"hello");
//! archive.close()?;
//! # Ok::<(), storm_mpq::Error>(())
//! ```

mod compact;
mod patch;
mod state;

use crate::crypto::NameHashes;
use crate::handle::{FileHandle, HandleArena, HandleMode, OpenFile, next_archive_id};
use crate::header::{ArchiveHeader, FormatVersion, UserDataHeader, md5_of};
use crate::options::{
    AddFileOptions, CreateOptions, LocaleFallback, OpenFileOptions, OpenOptions, WaveQuality,
};
use crate::path::{WildcardMask, name_to_system_path, validate_name};
use crate::special_files::{
    ATTRIBUTES, AttributeFlags, Attributes, FileAttributes, filetime_from_datetime,
    is_special_file, parse_listfile,
};
use crate::tables::{BlockFlags, HashDirectory, HashSlot};
use crate::verify::{ArchiveVerification, VerifyFlags, VerifyResult};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rayon::prelude::*;
use state::OpenArchive;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

/// Largest sector size shift accepted when creating an archive
const MAX_CREATE_SECTOR_SHIFT: u16 = 15;

/// A member as listed by the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Member name, or `File########.xxx` when the name is unknown
    pub name: String,
    /// Whether `name` is the real name
    pub name_known: bool,
    /// Index in the block table
    pub block_index: u32,
    /// Locale of the hash entry
    pub locale: u16,
    /// Platform of the hash entry
    pub platform: u16,
    /// Position of the stored data, relative to the archive header
    pub file_pos: u64,
    /// Uncompressed size
    pub file_size: u32,
    /// Stored size
    pub compressed_size: u32,
    /// Block flags
    pub flags: BlockFlags,
}

impl FileEntry {
    /// Check if the member is compressed
    pub fn is_compressed(&self) -> bool {
        self.flags.is_compressed()
    }

    /// Check if the member is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(BlockFlags::ENCRYPTED)
    }

    /// Check if the member is stored as one unit
    pub fn is_single_unit(&self) -> bool {
        self.flags.contains(BlockFlags::SINGLE_UNIT)
    }
}

/// Summary of an open archive
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Path of the archive file
    pub path: PathBuf,
    /// Offset of the MPQ header in the file
    pub archive_offset: u64,
    /// User data header in front of the archive, if any
    pub user_data: Option<UserDataHeader>,
    /// Format version
    pub format_version: FormatVersion,
    /// Sector size in bytes
    pub sector_size: u32,
    /// Slots in the hash directory
    pub hash_table_size: u32,
    /// Entries in the block table
    pub block_table_size: u32,
    /// Live members
    pub file_count: usize,
    /// Archive size recorded in the header
    pub archive_size: u64,
    /// Opened read-only
    pub read_only: bool,
    /// Arrays maintained in (attributes), empty when not maintained
    pub attributes: AttributeFlags,
    /// (listfile) is maintained
    pub has_listfile: bool,
}

/// Iterator over the members matching a wildcard mask
///
/// Yields members in hash-slot order. Reserved members such as (listfile)
/// are only listed when the mask itself starts with `(`.
#[derive(Debug)]
pub struct FileFinder<'a> {
    state: &'a OpenArchive,
    mask: WildcardMask,
    match_all: bool,
    include_special: bool,
    slot: usize,
}

impl Iterator for FileFinder<'_> {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        let slots = self.state.hashes.slots();
        while self.slot < slots.len() {
            let slot = self.slot;
            self.slot += 1;

            let Some(entry) = slots[slot].entry() else {
                continue;
            };
            let Some(found) = self.state.file_entry(entry) else {
                continue;
            };
            if !self.include_special && is_special_file(&found.name) {
                continue;
            }
            if self.match_all || self.mask.matches(&found.name) {
                return Some(found);
            }
        }
        None
    }
}

/// `Read + Seek` adapter over a read handle
///
/// Closes the handle when dropped.
#[derive(Debug)]
pub struct FileReader<'a> {
    archive: &'a Archive,
    handle: FileHandle,
}

impl FileReader<'_> {
    /// The underlying handle
    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    /// Uncompressed size of the member
    pub fn size(&self) -> Result<u64> {
        self.archive.size(self.handle)
    }
}

fn io_error(error: Error) -> io::Error {
    match error {
        Error::Io(e) => e,
        other => io::Error::other(other),
    }
}

impl Read for FileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.archive.read_into(self.handle, buf).map_err(io_error)
    }
}

impl Seek for FileReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.archive.seek(self.handle, pos).map_err(io_error)
    }
}

impl Drop for FileReader<'_> {
    fn drop(&mut self) {
        let _ = self.archive.close_file(self.handle);
    }
}

/// An MPQ archive opened for reading and, unless read-only, writing
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    state: Option<OpenArchive>,
    handles: Mutex<HandleArena>,
    /// Attached patches, oldest first
    patches: Vec<patch::PatchLayer>,
}

impl Archive {
    /// Open an existing archive with default options
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, OpenOptions::default())
    }

    /// Open an existing archive
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::ArchiveNotFound(path));
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .open(&path)?;
        let state = OpenArchive::load(file, &options)?;
        log::info!(
            "Opened {} ({} members{})",
            path.display(),
            state.hashes.live_count(),
            if options.read_only { ", read-only" } else { "" }
        );
        Ok(Self::from_state(path, state))
    }

    /// Create a new archive holding up to `max_file_count` members
    ///
    /// An existing file at `path` is overwritten.
    pub fn create<P: AsRef<Path>>(path: P, max_file_count: u32) -> Result<Self> {
        Self::create_with_options(path, CreateOptions::new().max_file_count(max_file_count))
    }

    /// Create a new archive
    pub fn create_with_options<P: AsRef<Path>>(path: P, options: CreateOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if options.sector_size_shift > MAX_CREATE_SECTOR_SHIFT {
            return Err(Error::invalid_argument(format!(
                "sector size shift {} exceeds {MAX_CREATE_SECTOR_SHIFT}",
                options.sector_size_shift
            )));
        }
        let hash_size = HashDirectory::size_for_capacity(options.max_file_count)?;

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut state = OpenArchive {
            file: Mutex::new(file),
            read_only: false,
            archive_offset: 0,
            user_data: None,
            header: ArchiveHeader::new(
                options.version,
                options.sector_size_shift,
                hash_size,
            ),
            hashes: HashDirectory::new(hash_size)?,
            blocks: Default::default(),
            names: HashMap::new(),
            attributes: (!options.attributes.is_empty())
                .then(|| Attributes::new(options.attributes, 0)),
            listfile: options.listfile,
            dirty: true,
            retired: Vec::new(),
            check_sector_crc: false,
            locale: options.locale,
        };
        state.flush()?;

        log::info!(
            "Created {} ({:?}, {hash_size} hash slots)",
            path.display(),
            options.version
        );
        Ok(Self::from_state(path, state))
    }

    fn from_state(path: PathBuf, state: OpenArchive) -> Self {
        Self {
            path,
            state: Some(state),
            handles: Mutex::new(HandleArena::new(next_archive_id())),
            patches: Vec::new(),
        }
    }

    fn state(&self) -> Result<&OpenArchive> {
        self.state.as_ref().ok_or(Error::ArchiveClosed)
    }

    fn writable(&mut self) -> Result<&mut OpenArchive> {
        let state = self.state.as_mut().ok_or(Error::ArchiveClosed)?;
        if state.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(state)
    }

    /// Run a mutation, then close the read handles on blocks it freed or
    /// re-keyed, even when it failed part way
    fn modify<T>(&mut self, op: impl FnOnce(&mut OpenArchive) -> Result<T>) -> Result<T> {
        let state = self.writable()?;
        let result = op(state);
        let retired = std::mem::take(&mut state.retired);
        if !retired.is_empty() {
            let closed = self.handles.get_mut().invalidate_blocks(&retired);
            if closed > 0 {
                log::debug!("Closed {closed} handles on blocks {retired:?}");
            }
        }
        result
    }

    /// Path of the archive file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the archive has not been closed
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Check if the archive refuses mutations
    pub fn is_read_only(&self) -> Result<bool> {
        Ok(self.state()?.read_only)
    }

    /// Write pending changes to disk
    pub fn flush(&mut self) -> Result<()> {
        match self.state.as_ref() {
            Some(state) if state.read_only => Ok(()),
            Some(_) => self.modify(OpenArchive::flush),
            None => Err(Error::ArchiveClosed),
        }
    }

    /// Flush and close the archive, invalidating every open handle
    ///
    /// Returns `false` when the archive was already closed.
    pub fn close(&mut self) -> Result<bool> {
        let Some(mut state) = self.state.take() else {
            return Ok(false);
        };
        let invalidated = self.handles.get_mut().invalidate_all();
        self.patches.clear();
        let result = state.flush();
        log::debug!(
            "Closed {} ({invalidated} open handles invalidated)",
            self.path.display()
        );
        result.map(|()| true)
    }

    /// Summary of the archive
    pub fn archive_info(&self) -> Result<ArchiveInfo> {
        let state = self.state()?;
        Ok(ArchiveInfo {
            path: self.path.clone(),
            archive_offset: state.archive_offset,
            user_data: state.user_data,
            format_version: state.header.format_version,
            sector_size: state.sector_size(),
            hash_table_size: state.hashes.size(),
            block_table_size: state.blocks.len() as u32,
            file_count: state.hashes.live_count(),
            archive_size: state.header.archive_size,
            read_only: state.read_only,
            attributes: state
                .attributes
                .as_ref()
                .map_or(AttributeFlags::empty(), |a| a.flags),
            has_listfile: state.listfile,
        })
    }

    /// Default locale for lookups and new members
    pub fn locale(&self) -> Result<u16> {
        Ok(self.state()?.locale)
    }

    /// Change the default locale
    pub fn set_locale(&mut self, locale: u16) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::ArchiveClosed)?;
        state.locale = locale;
        Ok(())
    }

    fn default_lookup() -> OpenFileOptions {
        OpenFileOptions::new().fallback(LocaleFallback::Any)
    }

    /// Check if a member exists, in this archive or an attached patch
    pub fn has_file(&self, name: &str) -> Result<bool> {
        match self.resolve_layered(name, Self::default_lookup()) {
            Ok(_) => Ok(true),
            Err(Error::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a whole member, from the newest patch that holds it
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let (layer, member) = self.resolve_layered(name, Self::default_lookup())?;
        self.layer_state(layer)?.read_member(member)
    }

    /// Listing entry of a member
    ///
    /// For a member supplied by a patch, the entry describes its place in
    /// the patch archive.
    pub fn file_info(&self, name: &str) -> Result<FileEntry> {
        let (layer, member) = self.resolve_layered(name, Self::default_lookup())?;
        let state = self.layer_state(layer)?;
        let entry = match member.slot.and_then(|slot| state.hashes.slot(slot)) {
            Some(HashSlot::Occupied(entry)) => state.file_entry(entry),
            _ => None,
        };
        match entry {
            Some(mut entry) => {
                if member.name_known {
                    entry.name = member.name;
                    entry.name_known = true;
                }
                Ok(entry)
            }
            None => Err(Error::FileNotFound(member.name)),
        }
    }

    /// Iterate over the members matching a wildcard mask
    pub fn find(&self, mask: &str) -> Result<FileFinder<'_>> {
        let state = self.state()?;
        let mask_pattern = WildcardMask::new(mask)?;
        Ok(FileFinder {
            state,
            match_all: mask_pattern.is_match_all(),
            mask: mask_pattern,
            include_special: mask.starts_with('('),
            slot: 0,
        })
    }

    /// Names of the members matching a wildcard mask
    pub fn find_files(&self, mask: &str) -> Result<Vec<String>> {
        Ok(self.find(mask)?.map(|entry| entry.name).collect())
    }

    /// Every member, reserved ones included, in hash-slot order
    pub fn list(&self) -> Result<Vec<FileEntry>> {
        let state = self.state()?;
        Ok(state
            .hashes
            .occupied()
            .filter_map(|(_, entry)| state.file_entry(entry))
            .collect())
    }

    /// Sorted known names of the regular members
    ///
    /// Members added or deleted by attached patches are taken into account.
    pub fn file_names(&self) -> Result<Vec<String>> {
        let state = self.state()?;
        let mut names: Vec<String> = state
            .hashes
            .occupied()
            .filter_map(|(_, entry)| state.name_of(entry))
            .filter(|name| !is_special_file(name))
            .map(str::to_string)
            .collect();
        if !self.patches.is_empty() {
            names = self.layered_names(names)?;
        }
        names.sort_by_key(|name| name.to_ascii_lowercase());
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        Ok(names)
    }

    /// Locales under which a name is stored
    pub fn enum_locales(&self, name: &str) -> Result<Vec<u16>> {
        let state = self.state()?;
        let name = validate_name(name)?;
        let found = state.hashes.find_all(&NameHashes::new(&name));
        if found.is_empty() {
            return Err(Error::FileNotFound(name));
        }
        Ok(found.into_iter().map(|(_, entry)| entry.locale).collect())
    }

    /// Sum of the uncompressed sizes of all live members
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.list()?.iter().map(|e| e.file_size as u64).sum())
    }

    /// Sum of the stored sizes of all live members
    pub fn total_compressed_size(&self) -> Result<u64> {
        Ok(self.list()?.iter().map(|e| e.compressed_size as u64).sum())
    }

    /// Stored size divided by uncompressed size, 1.0 for an empty archive
    pub fn compression_ratio(&self) -> Result<f64> {
        let total = self.total_size()?;
        if total == 0 {
            return Ok(1.0);
        }
        Ok(self.total_compressed_size()? as f64 / total as f64)
    }

    /// CRC32 and MD5 of a member's uncompressed data
    pub fn file_checksums(&self, name: &str) -> Result<(u32, [u8; 16])> {
        let data = self.read_file(name)?;
        let attributes = FileAttributes::compute(&data, 0);
        Ok((attributes.crc32, attributes.md5))
    }

    /// Extract one member to a file, creating parent directories
    pub fn extract_file<P: AsRef<Path>>(&self, name: &str, destination: P) -> Result<()> {
        let data = self.read_file(name)?;
        let destination = destination.as_ref();
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(destination, data)?;
        Ok(())
    }

    /// Extract every named regular member below `directory`
    ///
    /// Members are decoded in parallel. Returns the number of files written.
    pub fn extract_all_files<P: AsRef<Path>>(&self, directory: P) -> Result<usize> {
        let directory = directory.as_ref();
        let names = self.file_names()?;

        names
            .par_iter()
            .map(|name| {
                let relative = PathBuf::from(name_to_system_path(name));
                if !relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
                {
                    return Err(Error::invalid_argument(format!(
                        "{name} would be extracted outside the target directory"
                    )));
                }
                self.extract_file(name, directory.join(relative))
            })
            .collect::<Result<Vec<()>>>()?;

        log::info!("Extracted {} files to {}", names.len(), directory.display());
        Ok(names.len())
    }

    /// Add a file from disk
    pub fn add_file<P: AsRef<Path>>(
        &mut self,
        source: P,
        name: &str,
        options: AddFileOptions,
    ) -> Result<()> {
        let data = fs::read(source.as_ref())?;
        self.add_file_data(&data, name, options)
    }

    /// Add a member from memory
    ///
    /// An existing member with the same name and locale is replaced unless
    /// `replace_existing` is off, in which case [`Error::DuplicateFile`] is
    /// returned.
    pub fn add_file_data(&mut self, data: &[u8], name: &str, options: AddFileOptions) -> Result<()> {
        self.modify(|state| state.write_member(name, data, &options, true))?;
        Ok(())
    }

    /// Add a WAVE file, compressing the audio according to `quality`
    pub fn add_wave<P: AsRef<Path>>(
        &mut self,
        source: P,
        name: &str,
        quality: WaveQuality,
    ) -> Result<()> {
        let data = fs::read(source.as_ref())?;
        // channel count of the fmt chunk in a canonical header
        let channels = match data.get(22..24) {
            Some(&[lo, hi]) if data.starts_with(b"RIFF") => u16::from_le_bytes([lo, hi]),
            _ => 1,
        };
        let options = quality.add_file_options(channels);
        self.add_file_data(&data, name, options)
    }

    /// Remove a member
    ///
    /// Handles open on the member are closed.
    pub fn remove_file(&mut self, name: &str) -> Result<()> {
        self.modify(|state| {
            let member = state.resolve(name, Self::default_lookup())?;
            let slot = member.slot.ok_or(Error::FileNotFound(member.name))?;
            state.remove_slot(slot)?;
            log::debug!("Removed block {}", member.block_index);
            Ok(())
        })
    }

    /// Rename a member without moving its data
    ///
    /// Handles open on the member are closed, since encrypted data is
    /// re-keyed for the new name.
    pub fn rename_file(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let new_name = validate_name(new_name)?;
        self.modify(|state| {
            let member = state.resolve(old_name, Self::default_lookup())?;
            state.rename_member(&member, &new_name)
        })
    }

    /// Recompute the (attributes) entry of a member from its data
    pub fn update_file_attributes(&mut self, name: &str) -> Result<()> {
        let state = self.writable()?;
        let member = state.resolve(name, Self::default_lookup())?;
        if state.attributes.is_none() {
            return Ok(());
        }

        let block_index = member.block_index;
        let data = state.read_member(member)?;
        if let Some(attributes) = state.attributes.as_mut() {
            let filetime = attributes
                .get(block_index)
                .map(|a| a.filetime)
                .filter(|&t| t != 0)
                .unwrap_or_else(|| filetime_from_datetime(Utc::now()));
            attributes.set(block_index, FileAttributes::compute(&data, filetime));
        }
        state.dirty = true;
        Ok(())
    }

    /// Rewrite the archive without unused space
    ///
    /// Every open handle is invalidated.
    pub fn compact(&mut self) -> Result<()> {
        let path = self.path.clone();
        let state = self.writable()?;
        state.compact(&path)?;
        state.retired.clear();
        let invalidated = self.handles.get_mut().invalidate_all();
        if invalidated > 0 {
            log::debug!("Compaction invalidated {invalidated} open handles");
        }
        Ok(())
    }

    /// Capacity of the hash directory
    pub fn max_file_count(&self) -> Result<u32> {
        Ok(self.state()?.hashes.size())
    }

    /// Resize the hash directory to hold `max_file_count` members
    pub fn set_max_file_count(&mut self, max_file_count: u32) -> Result<()> {
        let state = self.writable()?;
        let live = state.hashes.live_count();
        if (max_file_count as usize) < live {
            return Err(Error::invalid_argument(format!(
                "archive already holds {live} members"
            )));
        }
        let size = HashDirectory::size_for_capacity(max_file_count)?;
        if size != state.hashes.size() {
            state.rehash(size)?;
        }
        Ok(())
    }

    /// Arrays maintained in (attributes)
    pub fn attributes(&self) -> Result<AttributeFlags> {
        Ok(self
            .state()?
            .attributes
            .as_ref()
            .map_or(AttributeFlags::empty(), |a| a.flags))
    }

    /// Choose the arrays maintained in (attributes); empty removes the file
    pub fn set_attributes(&mut self, flags: AttributeFlags) -> Result<()> {
        let state = self.writable()?;
        if flags.is_empty() {
            state.attributes = None;
            state.drop_special(ATTRIBUTES)?;
        } else {
            let count = state.blocks.len();
            let attributes = state
                .attributes
                .get_or_insert_with(|| Attributes::new(flags, count));
            attributes.flags = flags;
        }
        state.dirty = true;
        Ok(())
    }

    /// Learn member names from a listfile on disk
    pub fn add_list_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let data = fs::read(path.as_ref())?;
        self.add_list_file_data(&data)
    }

    /// Learn member names from listfile contents
    ///
    /// Returns how many names matched a live member.
    pub fn add_list_file_data(&mut self, data: &[u8]) -> Result<usize> {
        let names = parse_listfile(data)?;
        let state = self.state.as_mut().ok_or(Error::ArchiveClosed)?;
        let matched = names.iter().filter(|name| state.register_name(name)).count();
        log::debug!("Listfile matched {matched} of {} names", names.len());
        Ok(matched)
    }

    /// Check one member
    pub fn verify_file(&self, name: &str, flags: VerifyFlags) -> Result<VerifyResult> {
        let state = self.state()?;
        let member = state.resolve(name, Self::default_lookup())?;
        Ok(state.verify_member(member, flags))
    }

    /// Check the V4 table digests and every member with a known name
    pub fn verify_archive(&self) -> Result<ArchiveVerification> {
        let state = self.state()?;
        let mut report = ArchiveVerification::default();

        if let Some(v4) = state.header.v4 {
            let raw_header = state.read_at(0, state.header.format_version.header_size() as usize)?;
            report.header_md5 = state.header.verify_header_md5(&raw_header);

            let digest_of = |pos: u64, size: u64| -> Result<[u8; 16]> {
                Ok(md5_of(&state.read_at(pos, size as usize)?))
            };
            report.hash_table_md5 = Some(
                digest_of(state.header.hash_table_pos, v4.hash_table_size_64)? == v4.md5_hash_table,
            );
            report.block_table_md5 = Some(
                digest_of(state.header.block_table_pos, v4.block_table_size_64)?
                    == v4.md5_block_table,
            );
            if state.header.hi_block_table_pos != 0 && v4.hi_block_table_size_64 > 0 {
                report.hi_block_table_md5 = Some(
                    digest_of(state.header.hi_block_table_pos, v4.hi_block_table_size_64)?
                        == v4.md5_hi_block_table,
                );
            }
        }

        for (_, entry) in state.hashes.occupied() {
            let Some(name) = state.name_of(entry) else {
                continue;
            };
            let result = match state.resolve_index(entry.block_index) {
                Ok(member) => state.verify_member(member, VerifyFlags::ALL),
                Err(_) => VerifyResult::OPEN_ERROR,
            };
            report.files.push((name.to_string(), result));
        }
        Ok(report)
    }

    fn file_state(&self, handle: FileHandle) -> Result<(&OpenArchive, std::sync::Arc<Mutex<OpenFile>>)> {
        let file = self.handles.lock().get(handle)?;
        let layer = file.lock().layer;
        Ok((self.layer_state(layer)?, file))
    }

    /// Open a member for reading with default lookup rules
    pub fn open_file(&self, name: &str) -> Result<FileHandle> {
        self.open_file_with_options(name, Self::default_lookup())
    }

    /// Open a member for reading
    pub fn open_file_with_options(&self, name: &str, options: OpenFileOptions) -> Result<FileHandle> {
        let (layer, member) = self.resolve_layered(name, options)?;
        let mut file = self.layer_state(layer)?.open_member(member)?;
        file.layer = layer;
        Ok(self.handles.lock().insert(file))
    }

    /// Open a member by its block index
    pub fn open_file_by_index(&self, block_index: u32) -> Result<FileHandle> {
        let state = self.state()?;
        let member = state.resolve_index(block_index)?;
        let file = state.open_member(member)?;
        Ok(self.handles.lock().insert(file))
    }

    /// Open a member as a `Read + Seek` stream
    pub fn reader(&self, name: &str) -> Result<FileReader<'_>> {
        let handle = self.open_file(name)?;
        Ok(FileReader {
            archive: self,
            handle,
        })
    }

    /// Read up to `len` bytes from the current position
    pub fn read(&self, handle: FileHandle, len: usize) -> Result<Vec<u8>> {
        let (state, file) = self.file_state(handle)?;
        let mut file = file.lock();
        let remaining = file.size().saturating_sub(file.position);
        let mut buf = vec![0u8; len.min(remaining as usize)];
        let read = state.read_into(&mut file, &mut buf)?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Read into `buf` from the current position; 0 at the end
    pub fn read_into(&self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let (state, file) = self.file_state(handle)?;
        let mut file = file.lock();
        state.read_into(&mut file, buf)
    }

    /// Read a whole member through its handle
    pub fn read_all(&self, handle: FileHandle) -> Result<Vec<u8>> {
        let (state, file) = self.file_state(handle)?;
        let mut file = file.lock();
        state.read_all(&mut file)
    }

    /// Uncompressed size of the member behind a handle
    pub fn size(&self, handle: FileHandle) -> Result<u64> {
        let file = self.handles.lock().get(handle)?;
        let size = file.lock().size();
        Ok(size)
    }

    /// Current position of a handle
    pub fn position(&self, handle: FileHandle) -> Result<u64> {
        let file = self.handles.lock().get(handle)?;
        let position = file.lock().position;
        Ok(position)
    }

    /// Move a read handle to an absolute position
    ///
    /// Positions past the end are allowed; reads there return nothing.
    pub fn set_position(&self, handle: FileHandle, position: u64) -> Result<()> {
        self.seek(handle, SeekFrom::Start(position)).map(|_| ())
    }

    /// Move a read handle; returns the new position
    pub fn seek(&self, handle: FileHandle, pos: SeekFrom) -> Result<u64> {
        let file = self.handles.lock().get(handle)?;
        let mut file = file.lock();
        if file.is_writer() {
            return Err(Error::invalid_argument("cannot seek a handle opened for writing"));
        }

        let target = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(delta) => file.position as i128 + delta as i128,
            SeekFrom::End(delta) => file.size() as i128 + delta as i128,
        };
        let target = u64::try_from(target)
            .map_err(|_| Error::invalid_argument(format!("seek to negative position {target}")))?;
        file.position = target;
        Ok(target)
    }

    /// Name behind a handle
    pub fn file_name(&self, handle: FileHandle) -> Result<String> {
        let file = self.handles.lock().get(handle)?;
        let name = file.lock().member.name.clone();
        Ok(name)
    }

    /// Listing entry of the member behind a handle
    pub fn handle_info(&self, handle: FileHandle) -> Result<FileEntry> {
        let file = self.handles.lock().get(handle)?;
        let file = file.lock();
        Ok(FileEntry {
            name: file.member.name.clone(),
            name_known: file.member.name_known,
            block_index: file.member.block_index,
            locale: file.member.locale,
            platform: file.member.platform,
            file_pos: file.entry.file_pos,
            file_size: file.entry.file_size,
            compressed_size: file.entry.compressed_size,
            flags: file.entry.flags,
        })
    }

    /// Move the member behind a read handle to another locale
    pub fn set_file_locale(&mut self, handle: FileHandle, locale: u16) -> Result<()> {
        let file = self.handles.get_mut().get(handle)?;
        let state = self.writable()?;
        let mut file = file.lock();
        if file.layer.is_some() {
            return Err(Error::ReadOnly);
        }

        if let HandleMode::Write(pending) = &mut file.mode {
            pending.options.locale = Some(locale);
            file.member.locale = locale;
            return Ok(());
        }
        if file.member.locale == locale {
            return Ok(());
        }

        let hashes = NameHashes::new(&file.member.name);
        if state.hashes.find_exact(&hashes, locale).is_some() {
            return Err(Error::DuplicateFile(file.member.name.clone()));
        }
        let (slot, _) = state
            .hashes
            .find_exact(&hashes, file.member.locale)
            .ok_or_else(|| Error::FileNotFound(file.member.name.clone()))?;
        if let Some(entry) = state.hashes.entry_mut(slot) {
            entry.locale = locale;
        }
        file.member.locale = locale;
        state.dirty = true;
        Ok(())
    }

    /// Close a handle; `false` when it was already closed
    pub fn close_file(&self, handle: FileHandle) -> Result<bool> {
        Ok(self.handles.lock().remove(handle).is_some())
    }

    /// Number of open handles
    pub fn open_handle_count(&self) -> usize {
        self.handles.lock().live_count()
    }

    /// Start a new member of exactly `size` bytes
    ///
    /// Data is supplied with [`Archive::write`] and stored by
    /// [`Archive::finish`].
    pub fn create_file(&self, name: &str, size: u32, options: AddFileOptions) -> Result<FileHandle> {
        let state = self.state()?;
        if state.read_only {
            return Err(Error::ReadOnly);
        }
        let name = validate_name(name)?;
        let locale = options.locale.unwrap_or(state.locale);
        let exists = state
            .hashes
            .find_exact(&NameHashes::new(&name), locale)
            .is_some();
        if exists && !options.replace_existing {
            return Err(Error::DuplicateFile(name));
        }
        Ok(self
            .handles
            .lock()
            .insert(OpenFile::writer(name, size, locale, options)))
    }

    /// Append data to a member started with [`Archive::create_file`]
    pub fn write(&self, handle: FileHandle, data: &[u8]) -> Result<()> {
        let file = self.handles.lock().get(handle)?;
        let mut file = file.lock();
        let HandleMode::Write(pending) = &mut file.mode else {
            return Err(Error::invalid_argument("handle was opened for reading"));
        };
        let total = pending.buffer.len() + data.len();
        if total > pending.declared_size as usize {
            return Err(Error::invalid_argument(format!(
                "{total} bytes exceed the declared size of {}",
                pending.declared_size
            )));
        }
        pending.buffer.extend_from_slice(data);
        file.position = total as u64;
        Ok(())
    }

    /// Store a member started with [`Archive::create_file`]
    ///
    /// The handle is closed whether or not storing succeeds.
    pub fn finish(&mut self, handle: FileHandle) -> Result<()> {
        let file = self.handles.get_mut().get(handle)?;
        if !file.lock().is_writer() {
            return Err(Error::invalid_argument("handle was opened for reading"));
        }
        self.handles.get_mut().remove(handle);

        let mut file = file.lock();
        let HandleMode::Write(pending) = std::mem::replace(&mut file.mode, HandleMode::Read) else {
            return Err(Error::HandleClosed);
        };
        if pending.buffer.len() != pending.declared_size as usize {
            return Err(Error::invalid_argument(format!(
                "{} of {} declared bytes were written",
                pending.buffer.len(),
                pending.declared_size
            )));
        }

        let mut options = pending.options;
        options.locale = Some(file.member.locale);
        let name = file.member.name.clone();
        drop(file);
        self.modify(|state| state.write_member(&name, &pending.buffer, &options, true))?;
        Ok(())
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if let Some(state) = self.state.as_mut() {
            if let Err(e) = state.flush() {
                log::warn!("Failed to flush {} on drop: {e}", self.path.display());
            }
        }
    }
}
