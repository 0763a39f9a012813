//! File handles and the per-archive handle arena
//!
//! A [`FileHandle`] is a small copyable token: the id of the archive that
//! issued it, a slot in that archive's arena and the generation of the slot.
//! Closing a handle or the archive bumps the generation, so stale tokens fail
//! with [`Error::HandleClosed`] instead of reaching a reused slot.

use crate::options::AddFileOptions;
use crate::sector::FileLayout;
use crate::tables::BlockEntry;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ARCHIVE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a new archive instance
pub(crate) fn next_archive_id() -> u64 {
    NEXT_ARCHIVE_ID.fetch_add(1, Ordering::Relaxed)
}

/// An open member of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    archive: u64,
    index: u32,
    generation: u32,
}

/// Buffered member created with `create_file`
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) buffer: Vec<u8>,
    pub(crate) declared_size: u32,
    pub(crate) options: AddFileOptions,
}

/// What a handle is used for
#[derive(Debug)]
pub(crate) enum HandleMode {
    Read,
    Write(PendingWrite),
}

/// A member resolved through the hash directory or by block index
#[derive(Debug, Clone)]
pub(crate) struct MemberRef {
    pub(crate) name: String,
    /// The name is the real one, not a `File########.xxx` placeholder
    pub(crate) name_known: bool,
    pub(crate) slot: Option<usize>,
    pub(crate) block_index: u32,
    pub(crate) locale: u16,
    pub(crate) platform: u16,
}

/// State behind one handle
#[derive(Debug)]
pub(crate) struct OpenFile {
    pub(crate) member: MemberRef,
    pub(crate) entry: BlockEntry,
    pub(crate) layout: FileLayout,
    pub(crate) key: Option<u32>,
    pub(crate) position: u64,
    pub(crate) check_sector_crc: bool,
    /// Sector boundaries, read on first access
    pub(crate) offsets: Option<Vec<u32>>,
    /// Sector checksums, read on first checked access
    pub(crate) checksums: Option<Vec<u32>>,
    pub(crate) cached_sector: Option<u32>,
    pub(crate) cached_data: Vec<u8>,
    pub(crate) mode: HandleMode,
    /// Attached patch the member comes from, `None` for the archive itself
    pub(crate) layer: Option<usize>,
}

impl OpenFile {
    /// Read state for a stored member
    pub(crate) fn reader(
        member: MemberRef,
        entry: BlockEntry,
        sector_size: u32,
        key: Option<u32>,
    ) -> Self {
        Self {
            member,
            entry,
            layout: FileLayout::new(&entry, sector_size),
            key,
            position: 0,
            check_sector_crc: false,
            offsets: None,
            checksums: None,
            cached_sector: None,
            cached_data: Vec::new(),
            mode: HandleMode::Read,
            layer: None,
        }
    }

    /// Write state for a member that does not exist yet
    pub(crate) fn writer(name: String, declared_size: u32, locale: u16, options: AddFileOptions) -> Self {
        let entry = BlockEntry {
            file_size: declared_size,
            ..BlockEntry::default()
        };
        let member = MemberRef {
            name,
            name_known: true,
            slot: None,
            block_index: u32::MAX,
            locale,
            platform: options.platform,
        };
        Self {
            member,
            entry,
            layout: FileLayout::new(&entry, 1),
            key: None,
            position: 0,
            check_sector_crc: false,
            offsets: None,
            checksums: None,
            cached_sector: None,
            cached_data: Vec::new(),
            mode: HandleMode::Write(PendingWrite {
                buffer: Vec::with_capacity(declared_size as usize),
                declared_size,
                options,
            }),
            layer: None,
        }
    }

    /// Uncompressed size
    pub(crate) fn size(&self) -> u64 {
        self.entry.file_size as u64
    }

    /// Check if this handle writes a new member
    pub(crate) fn is_writer(&self) -> bool {
        matches!(self.mode, HandleMode::Write(_))
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    file: Option<Arc<Mutex<OpenFile>>>,
}

/// Slots for the handles of one archive
#[derive(Debug)]
pub(crate) struct HandleArena {
    archive: u64,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl HandleArena {
    pub(crate) fn new(archive: u64) -> Self {
        Self {
            archive,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Register a file and hand out its token
    pub(crate) fn insert(&mut self, file: OpenFile) -> FileHandle {
        let file = Some(Arc::new(Mutex::new(file)));
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].file = file;
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    file,
                });
                (self.slots.len() - 1) as u32
            }
        };
        FileHandle {
            archive: self.archive,
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn slot(&self, handle: FileHandle) -> Option<&Slot> {
        if handle.archive != self.archive {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.file.is_some())
    }

    /// State behind a live handle
    pub(crate) fn get(&self, handle: FileHandle) -> Result<Arc<Mutex<OpenFile>>> {
        self.slot(handle)
            .and_then(|slot| slot.file.clone())
            .ok_or(Error::HandleClosed)
    }

    /// Close a handle; `None` when it was not live
    pub(crate) fn remove(&mut self, handle: FileHandle) -> Option<Arc<Mutex<OpenFile>>> {
        self.slot(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        slot.file.take()
    }

    /// Close every handle; returns how many were live
    pub(crate) fn invalidate_all(&mut self) -> usize {
        let mut closed = 0;
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.file.take().is_some() {
                closed += 1;
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
        }
        closed
    }

    /// Close every read handle on one of `blocks`; returns how many were live
    pub(crate) fn invalidate_blocks(&mut self, blocks: &[u32]) -> usize {
        let mut closed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let stale = slot.file.as_ref().is_some_and(|file| {
                let file = file.lock();
                !file.is_writer()
                    && file.layer.is_none()
                    && blocks.contains(&file.member.block_index)
            });
            if stale {
                slot.file = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                closed += 1;
            }
        }
        closed
    }

    /// Number of live handles
    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.file.is_some()).count()
    }
}
