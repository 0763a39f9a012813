//! Raw numeric flags of the StormLib API
//!
//! The typed option structs in [`crate::options`] are the primary interface.
//! These constants exist for callers that carry StormLib flag words around;
//! they convert through the `from_raw` constructors of the option types.
//!
//! ```
//! use storm_mpq::flags::{MPQ_FILE_COMPRESS, MPQ_FILE_ENCRYPTED, MPQ_COMPRESSION_ZLIB};
//! use storm_mpq::AddFileOptions;
//!
//! let options = AddFileOptions::from_raw(
//!     MPQ_FILE_COMPRESS | MPQ_FILE_ENCRYPTED,
//!     MPQ_COMPRESSION_ZLIB,
//!     storm_mpq::flags::MPQ_COMPRESSION_NEXT_SAME,
//! )
//! .unwrap();
//! assert!(options.encrypt);
//! ```

use crate::{Error, Result};
use std::io::SeekFrom;

// Archive open flags
/// Do not load (listfile)
pub const MPQ_OPEN_NO_LISTFILE: u32 = 0x0001_0000;
/// Do not load (attributes)
pub const MPQ_OPEN_NO_ATTRIBUTES: u32 = 0x0002_0000;
/// Only look for the header at offset 0
pub const MPQ_OPEN_NO_HEADER_SEARCH: u32 = 0x0004_0000;
/// Check sector checksums on every read
pub const MPQ_OPEN_CHECK_SECTOR_CRC: u32 = 0x0010_0000;
/// Open the archive read-only
pub const MPQ_OPEN_READ_ONLY: u32 = 0x0000_0100;

// Archive create flags
/// Maintain a (listfile)
pub const MPQ_CREATE_LISTFILE: u32 = 0x0010_0000;
/// Maintain an (attributes) file
pub const MPQ_CREATE_ATTRIBUTES: u32 = 0x0020_0000;
/// Format version 1
pub const MPQ_CREATE_ARCHIVE_V1: u32 = 0x0000_0000;
/// Format version 2
pub const MPQ_CREATE_ARCHIVE_V2: u32 = 0x0100_0000;
/// Format version 3
pub const MPQ_CREATE_ARCHIVE_V3: u32 = 0x0200_0000;
/// Format version 4
pub const MPQ_CREATE_ARCHIVE_V4: u32 = 0x0300_0000;
/// Bits holding the format version
pub const MPQ_CREATE_ARCHIVE_VMASK: u32 = 0x0F00_0000;

// File flags
/// Member is imploded (PKWARE, no method byte)
pub const MPQ_FILE_IMPLODE: u32 = 0x0000_0100;
/// Member is compressed
pub const MPQ_FILE_COMPRESS: u32 = 0x0000_0200;
/// Member is encrypted
pub const MPQ_FILE_ENCRYPTED: u32 = 0x0001_0000;
/// Encryption key is adjusted by offset and size
pub const MPQ_FILE_FIX_KEY: u32 = 0x0002_0000;
/// Member is a patch file
pub const MPQ_FILE_PATCH_FILE: u32 = 0x0010_0000;
/// Member is stored as one unit
pub const MPQ_FILE_SINGLE_UNIT: u32 = 0x0100_0000;
/// Member is a deletion marker
pub const MPQ_FILE_DELETE_MARKER: u32 = 0x0200_0000;
/// Member has sector checksums
pub const MPQ_FILE_SECTOR_CRC: u32 = 0x0400_0000;
/// Member exists
pub const MPQ_FILE_EXISTS: u32 = 0x8000_0000;
/// Replace an existing member when adding
pub const MPQ_FILE_REPLACEEXISTING: u32 = 0x8000_0000;

// Compression methods
/// Huffman
pub const MPQ_COMPRESSION_HUFFMANN: u32 = 0x01;
/// zlib
pub const MPQ_COMPRESSION_ZLIB: u32 = 0x02;
/// PKWARE DCL
pub const MPQ_COMPRESSION_PKWARE: u32 = 0x08;
/// bzip2
pub const MPQ_COMPRESSION_BZIP2: u32 = 0x10;
/// Sparse
pub const MPQ_COMPRESSION_SPARSE: u32 = 0x20;
/// IMA ADPCM mono
pub const MPQ_COMPRESSION_ADPCM_MONO: u32 = 0x40;
/// IMA ADPCM stereo
pub const MPQ_COMPRESSION_ADPCM_STEREO: u32 = 0x80;
/// LZMA
pub const MPQ_COMPRESSION_LZMA: u32 = 0x12;
/// Later sectors use the same method as the first
pub const MPQ_COMPRESSION_NEXT_SAME: u32 = 0xFFFF_FFFF;

// Wave quality
/// Lossless
pub const MPQ_WAVE_QUALITY_HIGH: u32 = 0;
/// ADPCM, 4 bits
pub const MPQ_WAVE_QUALITY_MEDIUM: u32 = 1;
/// ADPCM, 2 bits
pub const MPQ_WAVE_QUALITY_LOW: u32 = 2;

// Open file search scope
/// Locale, then neutral
pub const SFILE_OPEN_FROM_MPQ: u32 = 0x0000_0000;
/// Any locale
pub const SFILE_OPEN_ANY_LOCALE: u32 = 0xFFFF_FFFE;

// Attributes
/// CRC32 array
pub const MPQ_ATTRIBUTE_CRC32: u32 = 0x0000_0001;
/// File time array
pub const MPQ_ATTRIBUTE_FILETIME: u32 = 0x0000_0002;
/// MD5 array
pub const MPQ_ATTRIBUTE_MD5: u32 = 0x0000_0004;
/// Patch bit array
pub const MPQ_ATTRIBUTE_PATCH_BIT: u32 = 0x0000_0008;
/// Every array
pub const MPQ_ATTRIBUTE_ALL: u32 = 0x0000_000F;

// File verification request
/// Check sector checksums
pub const SFILE_VERIFY_SECTOR_CRC: u32 = 0x0000_0001;
/// Check the CRC32 from (attributes)
pub const SFILE_VERIFY_FILE_CRC: u32 = 0x0000_0002;
/// Check the MD5 from (attributes)
pub const SFILE_VERIFY_FILE_MD5: u32 = 0x0000_0004;
/// Check the raw data MD5
pub const SFILE_VERIFY_RAW_MD5: u32 = 0x0000_0008;
/// Every check
pub const SFILE_VERIFY_ALL: u32 = 0x0000_000F;

// File verification result
/// Member could not be opened
pub const VERIFY_OPEN_ERROR: u32 = 0x0001;
/// Member could not be read
pub const VERIFY_READ_ERROR: u32 = 0x0002;
/// Member has sector checksums
pub const VERIFY_FILE_HAS_SECTOR_CRC: u32 = 0x0004;
/// A sector checksum did not match
pub const VERIFY_FILE_SECTOR_CRC_ERROR: u32 = 0x0008;
/// Member has a CRC32 in (attributes)
pub const VERIFY_FILE_HAS_CHECKSUM: u32 = 0x0010;
/// CRC32 did not match
pub const VERIFY_FILE_CHECKSUM_ERROR: u32 = 0x0020;
/// Member has an MD5 in (attributes)
pub const VERIFY_FILE_HAS_MD5: u32 = 0x0040;
/// MD5 did not match
pub const VERIFY_FILE_MD5_ERROR: u32 = 0x0080;
/// Member has a raw data MD5
pub const VERIFY_FILE_HAS_RAW_MD5: u32 = 0x0100;
/// Raw data MD5 did not match
pub const VERIFY_FILE_RAW_MD5_ERROR: u32 = 0x0200;
/// Every error bit
pub const VERIFY_FILE_ERROR_MASK: u32 = VERIFY_OPEN_ERROR
    | VERIFY_READ_ERROR
    | VERIFY_FILE_SECTOR_CRC_ERROR
    | VERIFY_FILE_CHECKSUM_ERROR
    | VERIFY_FILE_MD5_ERROR
    | VERIFY_FILE_RAW_MD5_ERROR;

/// Neutral locale
pub const LANG_NEUTRAL: u16 = 0x00;

// Seek origins
/// From the start of the member
pub const FILE_BEGIN: u32 = 0;
/// From the current position
pub const FILE_CURRENT: u32 = 1;
/// From the end of the member
pub const FILE_END: u32 = 2;

/// Build a [`SeekFrom`] from an offset and a StormLib move method
pub fn seek_from_raw(offset: i64, move_method: u32) -> Result<SeekFrom> {
    match move_method {
        FILE_BEGIN => u64::try_from(offset)
            .map(SeekFrom::Start)
            .map_err(|_| Error::invalid_argument(format!("negative position {offset}"))),
        FILE_CURRENT => Ok(SeekFrom::Current(offset)),
        FILE_END => Ok(SeekFrom::End(offset)),
        other => Err(Error::invalid_argument(format!(
            "unknown move method {other}"
        ))),
    }
}
