//! Read access shared by archive backends
//!
//! Code that only reads members can be written against [`Storage`] and run
//! on an [`Archive`] or on any other container, such as an in-memory map
//! used in tests.
//!
//! ```no_run
//! use storm_mpq::{Archive, Storage};
//!
//! fn total_size<S: Storage>(storage: &S, mask: &str) -> storm_mpq::Result<usize> {
//!     let mut total = 0;
//!     for name in storage.find_files(mask)? {
//!         total += storage.read_file(&name)?.len();
//!     }
//!     Ok(total)
//! }
//!
//! let archive = Archive::open("data.mpq")?;
//! println!("{} bytes of models", total_size(&archive, "*.mdx")?);
//! # Ok::<(), storm_mpq::Error>(())
//! ```

use crate::{Archive, FileHandle, Result};

/// A container of named members that can be read by handle
pub trait Storage {
    /// Token for an open member
    type Handle: Copy;

    /// Check if a member exists
    fn has_file(&self, name: &str) -> Result<bool>;

    /// Names matching a wildcard mask
    fn find_files(&self, mask: &str) -> Result<Vec<String>>;

    /// Open a member for reading
    fn open_file(&self, name: &str) -> Result<Self::Handle>;

    /// Uncompressed size of an open member
    fn file_size(&self, handle: Self::Handle) -> Result<u64>;

    /// Read from the current position; 0 at the end
    fn read(&self, handle: Self::Handle, buf: &mut [u8]) -> Result<usize>;

    /// Close a handle; `false` when it was already closed
    fn close_file(&self, handle: Self::Handle) -> Result<bool>;

    /// Read a whole member
    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let handle = self.open_file(name)?;
        let result = read_to_end(self, handle);
        self.close_file(handle)?;
        result
    }
}

fn read_to_end<S: Storage + ?Sized>(storage: &S, handle: S::Handle) -> Result<Vec<u8>> {
    let mut data = vec![0u8; storage.file_size(handle)? as usize];
    let mut filled = 0;
    while filled < data.len() {
        match storage.read(handle, &mut data[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    data.truncate(filled);
    Ok(data)
}

impl Storage for Archive {
    type Handle = FileHandle;

    fn has_file(&self, name: &str) -> Result<bool> {
        Archive::has_file(self, name)
    }

    fn find_files(&self, mask: &str) -> Result<Vec<String>> {
        Archive::find_files(self, mask)
    }

    fn open_file(&self, name: &str) -> Result<FileHandle> {
        Archive::open_file(self, name)
    }

    fn file_size(&self, handle: FileHandle) -> Result<u64> {
        Archive::size(self, handle)
    }

    fn read(&self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        Archive::read_into(self, handle, buf)
    }

    fn close_file(&self, handle: FileHandle) -> Result<bool> {
        Archive::close_file(self, handle)
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        Archive::read_file(self, name)
    }
}
