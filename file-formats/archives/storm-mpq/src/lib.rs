//! # storm_mpq - MPQ read/write engine
//!
//! A Rust implementation of the MPQ (Mo'PaQ) archive format used by
//! Blizzard Entertainment games, covering both reading and writing.
//!
//! The crate is layered the way the format is:
//!
//! - [`crypto`] and [`compression`]: the name hash, the table and sector
//!   cipher, and the per-sector compression methods
//! - [`tables`]: the hash directory that maps names to block indices and the
//!   block table that places member data in the file
//! - [`sector`]: splitting members into sectors, sector offset tables and
//!   sector checksums
//! - [`archive`]: the [`Archive`] engine with whole-member operations,
//!   compaction and file handles
//!
//! ## Features
//!
//! - Format versions 1 to 4 (classic hash and block tables)
//! - zlib, bzip2, LZMA, PKWARE DCL, Huffman, IMA ADPCM and sparse compression
//! - Encrypted members, with key recovery when the name is unknown
//! - (listfile) and (attributes) maintenance
//! - Sector checksums and (attributes) based verification
//!
//! ## Examples
//!
//! ### Reading
//!
//! ```no_run
//! use storm_mpq::Archive;
//!
//! # fn main() -> Result<(), storm_mpq::Error> {
//! let archive = Archive::open("example.mpq")?;
//!
//! for name in archive.find_files("*.mdx")? {
//!     println!("{name}");
//! }
//!
//! let script = archive.read_file("war3map.j")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Writing
//!
//! ```no_run
//! use storm_mpq::{AddFileOptions, CompressionMethod, CreateOptions, FormatVersion};
//!
//! # fn main() -> Result<(), storm_mpq::Error> {
//! let mut archive = CreateOptions::new()
//!     .version(FormatVersion::V2)
//!     .max_file_count(256)
//!     .create("mod.mpq")?;
//!
//! archive.add_file_data(
//!     b"function main takes nothing returns nothing\nendfunction\n",
//!     "war3map.j",
//!     AddFileOptions::new()
//!         .compression(CompressionMethod::BZip2)
//!         .encrypt(),
//! )?;
//! archive.rename_file("war3map.j", "scripts\\war3map.j")?;
//! archive.close()?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod archive;
pub mod compression;
pub mod crypto;
pub mod error;
pub mod flags;
mod handle;
pub mod header;
pub mod options;
pub mod path;
pub mod sector;
pub mod special_files;
pub mod storage;
pub mod tables;
pub mod verify;

// Re-export commonly used types
pub use archive::{Archive, ArchiveInfo, FileEntry, FileFinder, FileReader};
pub use compression::CompressionMethod;
pub use error::{Error, Result};
pub use handle::FileHandle;
pub use header::{ArchiveHeader, FormatVersion};
pub use options::{
    AddFileOptions, CreateOptions, LocaleFallback, OpenFileOptions, OpenOptions, WaveQuality,
};
pub use special_files::{AttributeFlags, FileAttributes};
pub use storage::Storage;
pub use tables::{BlockEntry, BlockFlags, HashEntry};
pub use verify::{ArchiveVerification, VerifyFlags, VerifyResult};

/// Largest sector size shift whose sector size still fits in a `u32`
pub const MAX_SECTOR_SIZE_SHIFT: u16 = 22;

/// Sector size for a header sector size shift
///
/// Shifts above [`MAX_SECTOR_SIZE_SHIFT`] saturate to the largest sector.
#[inline]
pub fn calculate_sector_size(sector_size_shift: u16) -> u32 {
    512 << sector_size_shift.min(MAX_SECTOR_SIZE_SHIFT)
}

/// Check if a value is a power of two
#[inline]
pub fn is_power_of_two(value: u32) -> bool {
    value != 0 && (value & (value - 1)) == 0
}
