//! Compaction: rewrite an archive without the gaps left by removed members

use super::state::{OpenArchive, write_tables};
use crate::crypto::NameHashes;
use crate::sector::{FileLayout, rekey};
use crate::special_files::{ATTRIBUTES, LISTFILE};
use crate::tables::{BlockEntry, BlockFlags, BlockTable};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// One live block and where it goes
struct Move {
    old_index: u32,
    entry: BlockEntry,
    new_pos: u64,
    /// Old and new key for blocks whose key depends on the position
    rekey: Option<(u32, u32)>,
}

/// Key of a FIX_KEY member after moving it to `new_pos`
///
/// The key is `(base + pos) ^ size`, so the base can be recovered from the
/// old key without knowing the name.
fn moved_key(old_key: u32, entry: &BlockEntry, new_pos: u64) -> u32 {
    let base = (old_key ^ entry.file_size).wrapping_sub(entry.file_pos as u32);
    base.wrapping_add(new_pos as u32) ^ entry.file_size
}

impl OpenArchive {
    /// Copy every live block into a fresh file and swap it in
    ///
    /// The new file is built next to `path` and only replaces it once
    /// complete, so a failure leaves the original untouched. (listfile) and
    /// (attributes) are not copied; the closing flush writes them again.
    pub(super) fn compact(&mut self, path: &Path) -> Result<()> {
        self.flush()?;

        let regenerated: Vec<NameHashes> = [
            (LISTFILE, self.listfile),
            (ATTRIBUTES, self.attributes.is_some()),
        ]
        .into_iter()
        .filter(|(_, maintained)| *maintained)
        .map(|(name, _)| NameHashes::new(name))
        .collect();

        let mut referenced: Vec<u32> = self
            .hashes
            .occupied()
            .filter(|(_, e)| !regenerated.iter().any(|h| e.matches(h)))
            .map(|(_, e)| e.block_index)
            .collect();
        referenced.sort_unstable();
        referenced.dedup();

        let mut moves = Vec::with_capacity(referenced.len());
        let mut cursor = self.data_start();
        for old_index in referenced {
            let entry = *self
                .blocks
                .get(old_index)
                .ok_or_else(|| Error::invalid_format(format!("block {old_index} is missing")))?;
            let new_pos = cursor;
            cursor += entry.compressed_size as u64;

            let rekey = if entry.flags.contains(BlockFlags::FIX_KEY) && new_pos != entry.file_pos {
                let member = self.resolve_index(old_index)?;
                self.member_key(&member, &entry)?
                    .map(|old_key| (old_key, moved_key(old_key, &entry, new_pos)))
            } else {
                None
            };
            moves.push(Move {
                old_index,
                entry,
                new_pos,
                rekey,
            });
        }

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(parent)?;

        {
            let out = temp.as_file_mut();
            if self.archive_offset > 0 {
                let mut source = self.file.lock();
                source.seek(SeekFrom::Start(0))?;
                io::copy(&mut (&mut *source).take(self.archive_offset), out)?;
            }
            // placeholder, the header is written with the tables
            out.write_all(&vec![0u8; self.data_start() as usize])?;

            for m in &moves {
                let mut stored = self.read_at(m.entry.file_pos, m.entry.compressed_size as usize)?;
                if let Some((old_key, new_key)) = m.rekey {
                    let layout = FileLayout::new(&m.entry, self.sector_size());
                    rekey(&layout, &mut stored, old_key, new_key)?;
                }
                out.write_all(&stored)?;
            }
        }

        let mut blocks = BlockTable::new();
        blocks.replace_entries(
            moves
                .iter()
                .map(|m| BlockEntry {
                    file_pos: m.new_pos,
                    ..m.entry
                })
                .collect(),
        );
        let renumber: HashMap<u32, u32> = moves
            .iter()
            .enumerate()
            .map(|(new, m)| (m.old_index, new as u32))
            .collect();

        let mut hashes = self.hashes.clone();
        let mut orphaned = Vec::new();
        for slot in 0..hashes.size() as usize {
            if let Some(entry) = hashes.entry_mut(slot) {
                match renumber.get(&entry.block_index) {
                    Some(&new) => entry.block_index = new,
                    None => orphaned.push(slot),
                }
            }
        }
        for slot in orphaned {
            hashes.remove(slot)?;
        }
        // clears tombstones when every name is known
        let names = &self.names;
        if let Ok(clean) = hashes.rehash(hashes.size(), |entry| {
            names
                .get(&(entry.name_a, entry.name_b))
                .map(|name| NameHashes::new(name))
        }) {
            hashes = clean;
        }

        let old_indices: Vec<u32> = moves.iter().map(|m| m.old_index).collect();
        let attributes = self.attributes.clone().map(|mut attributes| {
            attributes.reindex(&old_indices);
            attributes
        });

        let mut header = self.header.clone();
        write_tables(
            temp.as_file_mut(),
            self.archive_offset,
            &mut header,
            &hashes,
            &blocks,
            cursor,
        )?;
        temp.as_file().sync_all()?;
        if let Ok(metadata) = fs::metadata(path) {
            fs::set_permissions(temp.path(), metadata.permissions())?;
        }

        let file = temp.persist(path).map_err(|e| Error::Io(e.error))?;
        log::info!(
            "Compacted {}: {} blocks, data ends at {cursor:#x}",
            path.display(),
            blocks.len()
        );

        self.file = Mutex::new(file);
        self.header = header;
        self.hashes = hashes;
        self.blocks = blocks;
        self.attributes = attributes;
        self.dirty = true;
        self.flush()
    }
}
