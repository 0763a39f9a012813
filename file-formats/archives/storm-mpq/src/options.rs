//! Options for opening, creating and writing archives

use crate::compression::{CompressionMethod, flags as method};
use crate::flags::*;
use crate::header::FormatVersion;
use crate::special_files::AttributeFlags;
use crate::tables::{BlockFlags, LOCALE_NEUTRAL};
use crate::{Archive, Error, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Which locales a lookup may fall back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocaleFallback {
    /// Only the requested locale
    Exact,
    /// The requested locale, then the neutral one
    Neutral,
    /// The requested locale, then neutral, then any other
    #[default]
    Any,
}

/// Options for opening an existing archive
///
/// ```no_run
/// use storm_mpq::OpenOptions;
///
/// let archive = OpenOptions::new()
///     .read_only(true)
///     .check_sector_crc(true)
///     .open("data.mpq")?;
/// # Ok::<(), storm_mpq::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Refuse every mutation
    pub read_only: bool,
    /// Learn member names from (listfile)
    pub load_listfile: bool,
    /// Load (attributes)
    pub load_attributes: bool,
    /// Scan for a header past offset 0
    pub header_search: bool,
    /// Check sector checksums on every read
    pub check_sector_crc: bool,
    /// Default locale of the archive
    pub locale: u16,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            load_listfile: true,
            load_attributes: true,
            header_search: true,
            check_sector_crc: false,
            locale: LOCALE_NEUTRAL,
        }
    }
}

impl OpenOptions {
    /// Create new default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from `MPQ_OPEN_*` flags
    pub fn from_raw(flags: u32) -> Self {
        Self {
            read_only: flags & MPQ_OPEN_READ_ONLY != 0,
            load_listfile: flags & MPQ_OPEN_NO_LISTFILE == 0,
            load_attributes: flags & MPQ_OPEN_NO_ATTRIBUTES == 0,
            header_search: flags & MPQ_OPEN_NO_HEADER_SEARCH == 0,
            check_sector_crc: flags & MPQ_OPEN_CHECK_SECTOR_CRC != 0,
            locale: LOCALE_NEUTRAL,
        }
    }

    /// Open read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Load (listfile) on open
    pub fn load_listfile(mut self, load: bool) -> Self {
        self.load_listfile = load;
        self
    }

    /// Load (attributes) on open
    pub fn load_attributes(mut self, load: bool) -> Self {
        self.load_attributes = load;
        self
    }

    /// Search for the header past offset 0
    pub fn header_search(mut self, search: bool) -> Self {
        self.header_search = search;
        self
    }

    /// Check sector checksums on every read
    pub fn check_sector_crc(mut self, check: bool) -> Self {
        self.check_sector_crc = check;
        self
    }

    /// Default locale of the archive
    pub fn locale(mut self, locale: u16) -> Self {
        self.locale = locale;
        self
    }

    /// Open an archive with these options
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Archive> {
        Archive::open_with_options(path, self)
    }
}

/// Options for creating a new archive
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Members the hash directory is sized for
    pub max_file_count: u32,
    /// Format version
    pub version: FormatVersion,
    /// Sector size exponent: sectors are `512 << shift` bytes
    pub sector_size_shift: u16,
    /// Maintain a (listfile)
    pub listfile: bool,
    /// Arrays maintained in (attributes); empty for none
    pub attributes: AttributeFlags,
    /// Default locale of the archive
    pub locale: u16,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            max_file_count: 1000,
            version: FormatVersion::V1,
            sector_size_shift: 3,
            listfile: true,
            attributes: AttributeFlags::default(),
            locale: LOCALE_NEUTRAL,
        }
    }
}

impl CreateOptions {
    /// Create new default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from `MPQ_CREATE_*` flags
    pub fn from_raw(flags: u32, max_file_count: u32) -> Result<Self> {
        let version = match flags & MPQ_CREATE_ARCHIVE_VMASK {
            MPQ_CREATE_ARCHIVE_V1 => FormatVersion::V1,
            MPQ_CREATE_ARCHIVE_V2 => FormatVersion::V2,
            MPQ_CREATE_ARCHIVE_V3 => FormatVersion::V3,
            MPQ_CREATE_ARCHIVE_V4 => FormatVersion::V4,
            other => return Err(Error::UnsupportedVersion((other >> 24) as u16)),
        };
        Ok(Self {
            max_file_count,
            version,
            listfile: flags & MPQ_CREATE_LISTFILE != 0,
            attributes: if flags & MPQ_CREATE_ATTRIBUTES != 0 {
                AttributeFlags::default()
            } else {
                AttributeFlags::empty()
            },
            ..Self::default()
        })
    }

    /// Size the hash directory for this many members
    pub fn max_file_count(mut self, count: u32) -> Self {
        self.max_file_count = count;
        self
    }

    /// Format version
    pub fn version(mut self, version: FormatVersion) -> Self {
        self.version = version;
        self
    }

    /// Sector size exponent
    pub fn sector_size_shift(mut self, shift: u16) -> Self {
        self.sector_size_shift = shift;
        self
    }

    /// Maintain a (listfile)
    pub fn listfile(mut self, listfile: bool) -> Self {
        self.listfile = listfile;
        self
    }

    /// Arrays maintained in (attributes)
    pub fn attributes(mut self, attributes: AttributeFlags) -> Self {
        self.attributes = attributes;
        self
    }

    /// Default locale of the archive
    pub fn locale(mut self, locale: u16) -> Self {
        self.locale = locale;
        self
    }

    /// Create an archive with these options
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<Archive> {
        Archive::create_with_options(path, self)
    }
}

/// Options for adding a member
#[derive(Debug, Clone)]
pub struct AddFileOptions {
    /// Compression of the first sector
    pub compression: CompressionMethod,
    /// Compression of the remaining sectors, `None` for the same as the first
    pub compression_next: Option<CompressionMethod>,
    /// Encrypt the member
    pub encrypt: bool,
    /// Bind the key to offset and size (implies `encrypt`)
    pub fix_key: bool,
    /// Store the member as one unit
    pub single_unit: bool,
    /// Write sector checksums
    pub sector_crc: bool,
    /// Implode with PKWARE instead of compressing
    pub implode: bool,
    /// Replace a member with the same name and locale
    pub replace_existing: bool,
    /// Locale, `None` for the archive default
    pub locale: Option<u16>,
    /// Platform
    pub platform: u16,
    /// File time recorded in (attributes), `None` for now
    pub file_time: Option<DateTime<Utc>>,
    /// ADPCM level for audio methods
    pub adpcm_level: u8,
}

impl Default for AddFileOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Zlib,
            compression_next: None,
            encrypt: false,
            fix_key: false,
            single_unit: false,
            sector_crc: false,
            implode: false,
            replace_existing: true,
            locale: None,
            platform: 0,
            file_time: None,
            adpcm_level: crate::compression::DEFAULT_ADPCM_LEVEL,
        }
    }
}

impl AddFileOptions {
    /// Create new default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from `MPQ_FILE_*` flags and `MPQ_COMPRESSION_*` masks
    ///
    /// `MPQ_FILE_REPLACEEXISTING` shares its bit with `MPQ_FILE_EXISTS`.
    /// Without `MPQ_FILE_COMPRESS` or `MPQ_FILE_IMPLODE` the member is stored.
    pub fn from_raw(flags: u32, compression: u32, compression_next: u32) -> Result<Self> {
        let mask = |raw: u32| -> Result<CompressionMethod> {
            let byte = u8::try_from(raw).map_err(|_| {
                Error::invalid_argument(format!("invalid compression mask {raw:#x}"))
            })?;
            CompressionMethod::from_flags(byte).validate()
        };

        let compressed = flags & MPQ_FILE_COMPRESS != 0;
        Ok(Self {
            compression: if compressed {
                mask(compression)?
            } else {
                CompressionMethod::None
            },
            compression_next: if compressed && compression_next != MPQ_COMPRESSION_NEXT_SAME {
                Some(mask(compression_next)?)
            } else {
                None
            },
            encrypt: flags & (MPQ_FILE_ENCRYPTED | MPQ_FILE_FIX_KEY) != 0,
            fix_key: flags & MPQ_FILE_FIX_KEY != 0,
            single_unit: flags & MPQ_FILE_SINGLE_UNIT != 0,
            sector_crc: flags & MPQ_FILE_SECTOR_CRC != 0,
            implode: flags & MPQ_FILE_IMPLODE != 0,
            replace_existing: flags & MPQ_FILE_REPLACEEXISTING != 0,
            ..Self::default()
        })
    }

    /// Compression of every sector
    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Compression of the sectors after the first
    pub fn compression_next(mut self, method: CompressionMethod) -> Self {
        self.compression_next = Some(method);
        self
    }

    /// Enable encryption
    pub fn encrypt(mut self) -> Self {
        self.encrypt = true;
        self
    }

    /// Enable FIX_KEY encryption
    pub fn fix_key(mut self) -> Self {
        self.fix_key = true;
        self.encrypt = true;
        self
    }

    /// Store as one unit
    pub fn single_unit(mut self) -> Self {
        self.single_unit = true;
        self
    }

    /// Write sector checksums
    pub fn sector_crc(mut self) -> Self {
        self.sector_crc = true;
        self
    }

    /// Implode with PKWARE
    pub fn implode(mut self) -> Self {
        self.implode = true;
        self
    }

    /// Set whether to replace existing members
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    /// Set locale
    pub fn locale(mut self, locale: u16) -> Self {
        self.locale = Some(locale);
        self
    }

    /// Set platform
    pub fn platform(mut self, platform: u16) -> Self {
        self.platform = platform;
        self
    }

    /// Set the recorded file time
    pub fn file_time(mut self, time: DateTime<Utc>) -> Self {
        self.file_time = Some(time);
        self
    }

    /// Set the ADPCM level (1..=6)
    pub fn adpcm_level(mut self, level: u8) -> Self {
        self.adpcm_level = level;
        self
    }

    /// Block flags requested by these options
    pub(crate) fn block_flags(&self) -> BlockFlags {
        let mut flags = BlockFlags::EXISTS;
        if self.implode {
            flags |= BlockFlags::IMPLODE;
        } else if self.compression != CompressionMethod::None
            || self
                .compression_next
                .is_some_and(|m| m != CompressionMethod::None)
        {
            flags |= BlockFlags::COMPRESS;
        }
        if self.encrypt || self.fix_key {
            flags |= BlockFlags::ENCRYPTED;
        }
        if self.fix_key {
            flags |= BlockFlags::FIX_KEY;
        }
        if self.single_unit {
            flags |= BlockFlags::SINGLE_UNIT;
        }
        if self.sector_crc {
            flags |= BlockFlags::SECTOR_CRC;
        }
        flags
    }

    /// Method masks for the first and the remaining sectors
    pub(crate) fn masks(&self) -> Result<(u8, u8)> {
        let first = self.compression.validate()?.to_flags();
        let next = match self.compression_next {
            Some(next) => next.validate()?.to_flags(),
            None => first,
        };
        Ok((first, next))
    }
}

/// Options for opening a member
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFileOptions {
    /// Locale to look for, `None` for the archive default
    pub locale: Option<u16>,
    /// Which other locales may be used
    pub fallback: LocaleFallback,
}

impl OpenFileOptions {
    /// Create new default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from an `SFILE_OPEN_*` search scope
    pub fn from_raw(search_scope: u32) -> Result<Self> {
        let fallback = match search_scope {
            SFILE_OPEN_FROM_MPQ => LocaleFallback::Neutral,
            SFILE_OPEN_ANY_LOCALE => LocaleFallback::Any,
            other => {
                return Err(Error::invalid_argument(format!(
                    "unsupported search scope {other:#x}"
                )));
            }
        };
        Ok(Self {
            locale: None,
            fallback,
        })
    }

    /// Locale to look for
    pub fn locale(mut self, locale: u16) -> Self {
        self.locale = Some(locale);
        self
    }

    /// Which other locales may be used
    pub fn fallback(mut self, fallback: LocaleFallback) -> Self {
        self.fallback = fallback;
        self
    }
}

/// Quality of audio stored with `add_wave`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveQuality {
    /// Lossless: PKWARE for every sector
    #[default]
    High,
    /// ADPCM with 4-bit steps plus Huffman
    Medium,
    /// ADPCM with 2-bit steps plus Huffman
    Low,
}

impl WaveQuality {
    /// Parse an `MPQ_WAVE_QUALITY_*` value
    pub fn from_raw(quality: u32) -> Result<Self> {
        match quality {
            MPQ_WAVE_QUALITY_HIGH => Ok(WaveQuality::High),
            MPQ_WAVE_QUALITY_MEDIUM => Ok(WaveQuality::Medium),
            MPQ_WAVE_QUALITY_LOW => Ok(WaveQuality::Low),
            other => Err(Error::invalid_argument(format!(
                "unknown wave quality {other}"
            ))),
        }
    }

    /// ADPCM level used for sectors after the first
    pub fn adpcm_level(self) -> u8 {
        match self {
            WaveQuality::High => crate::compression::DEFAULT_ADPCM_LEVEL,
            WaveQuality::Medium => 4,
            WaveQuality::Low => 2,
        }
    }

    /// Method mask for sectors after the first
    pub fn compression_next(self, channels: u16) -> u8 {
        match self {
            WaveQuality::High => method::PKWARE,
            WaveQuality::Medium | WaveQuality::Low if channels >= 2 => {
                method::ADPCM_STEREO | method::HUFFMAN
            }
            WaveQuality::Medium | WaveQuality::Low => method::ADPCM_MONO | method::HUFFMAN,
        }
    }

    /// Add-file options for a wave with `channels` channels
    pub(crate) fn add_file_options(self, channels: u16) -> AddFileOptions {
        AddFileOptions::new()
            .compression(CompressionMethod::PKWare)
            .compression_next(CompressionMethod::from_flags(self.compression_next(channels)))
            .adpcm_level(self.adpcm_level())
    }
}
