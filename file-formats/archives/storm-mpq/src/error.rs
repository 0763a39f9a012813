//! Error types for the archive engine

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for archive operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Empty name, bad size, out-of-range number or a similar caller mistake
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The archive path does not exist
    #[error("Archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    /// Member not found in the archive
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// No archive header was found anywhere in the file
    #[error("Not an MPQ archive: {0}")]
    NotAnArchive(String),

    /// Header or tables are structurally broken
    #[error("Invalid MPQ format: {0}")]
    InvalidFormat(String),

    /// Unsupported format version
    #[error("Unsupported MPQ version: {0}")]
    UnsupportedVersion(u16),

    /// Feature that this engine does not implement
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A live member with the same name and locale already exists
    #[error("File already exists: {0}")]
    DuplicateFile(String),

    /// Write attempted on an archive opened read-only
    #[error("Archive is read-only")]
    ReadOnly,

    /// Operation on an archive that was already closed
    #[error("Archive is closed")]
    ArchiveClosed,

    /// Operation on a file handle that was closed or invalidated
    #[error("File handle is closed")]
    HandleClosed,

    /// A sector could not be decoded
    #[error("Corrupt sector {sector} in {file}: {reason}")]
    CorruptSector {
        /// Member name
        file: String,
        /// Sector index within the member
        sector: u32,
        /// What went wrong
        reason: String,
    },

    /// Sector checksum mismatch
    #[error("Sector checksum mismatch in {file} sector {sector}: expected {expected:08x}, got {actual:08x}")]
    SectorChecksum {
        /// Member name
        file: String,
        /// Sector index within the member
        sector: u32,
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// Every hash table slot was probed without finding room
    #[error("Hash table is full")]
    HashTableFull,

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),
}

impl Error {
    /// Create a new InvalidArgument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a new InvalidFormat error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Create a new Compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Error::Compression(msg.into())
    }

    /// Create a new Unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a new CorruptSector error
    pub fn corrupt_sector<F: Into<String>, S: Into<String>>(file: F, sector: u32, reason: S) -> Self {
        Error::CorruptSector {
            file: file.into(),
            sector,
            reason: reason.into(),
        }
    }

    /// Check if this error indicates the archive is corrupted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat(_)
                | Error::NotAnArchive(_)
                | Error::CorruptSector { .. }
                | Error::SectorChecksum { .. }
                | Error::Compression(_)
        )
    }

    /// Check if this error is a permanent logical error the caller can act on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::FileNotFound(_)
                | Error::ArchiveNotFound(_)
                | Error::DuplicateFile(_)
                | Error::ReadOnly
                | Error::InvalidArgument(_)
        )
    }

    /// Check if this error comes from using a closed archive or handle
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ArchiveClosed | Error::HandleClosed)
    }
}
