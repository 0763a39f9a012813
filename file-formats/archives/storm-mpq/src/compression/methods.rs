//! Compression method definitions and flags

use crate::{Error, Result};

/// Compression method flags as stored in the method byte
pub mod flags {
    /// Huffman encoding (WAVE files only)
    pub const HUFFMAN: u8 = 0x01;
    /// Deflate/zlib compression
    pub const ZLIB: u8 = 0x02;
    /// PKWare DCL compression
    pub const PKWARE: u8 = 0x08;
    /// BZip2 compression
    pub const BZIP2: u8 = 0x10;
    /// Sparse/RLE compression
    pub const SPARSE: u8 = 0x20;
    /// IMA ADPCM mono
    pub const ADPCM_MONO: u8 = 0x40;
    /// IMA ADPCM stereo
    pub const ADPCM_STEREO: u8 = 0x80;
    /// LZMA compression (not a flag combination)
    pub const LZMA: u8 = 0x12;

    /// Every bit that may appear in a chained mask
    pub const CHAINABLE: u8 =
        HUFFMAN | ZLIB | PKWARE | BZIP2 | SPARSE | ADPCM_MONO | ADPCM_STEREO;
}

/// Compression methods enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// No compression
    None,
    /// Huffman encoding (WAVE files only)
    Huffman,
    /// Deflate/zlib compression
    #[default]
    Zlib,
    /// PKWare DCL compression
    PKWare,
    /// BZip2 compression
    BZip2,
    /// Sparse/RLE compression
    Sparse,
    /// IMA ADPCM mono
    AdpcmMono,
    /// IMA ADPCM stereo
    AdpcmStereo,
    /// LZMA compression
    Lzma,
    /// Multiple compression methods applied in sequence
    Multiple(u8),
}

impl CompressionMethod {
    /// Determine compression method(s) from flags
    pub fn from_flags(flags: u8) -> Self {
        match flags {
            0 => CompressionMethod::None,
            flags::LZMA => CompressionMethod::Lzma,
            flags::HUFFMAN => CompressionMethod::Huffman,
            flags::ZLIB => CompressionMethod::Zlib,
            flags::PKWARE => CompressionMethod::PKWare,
            flags::BZIP2 => CompressionMethod::BZip2,
            flags::SPARSE => CompressionMethod::Sparse,
            flags::ADPCM_MONO => CompressionMethod::AdpcmMono,
            flags::ADPCM_STEREO => CompressionMethod::AdpcmStereo,
            _ => CompressionMethod::Multiple(flags),
        }
    }

    /// The method byte for this method
    pub fn to_flags(self) -> u8 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Huffman => flags::HUFFMAN,
            CompressionMethod::Zlib => flags::ZLIB,
            CompressionMethod::PKWare => flags::PKWARE,
            CompressionMethod::BZip2 => flags::BZIP2,
            CompressionMethod::Sparse => flags::SPARSE,
            CompressionMethod::AdpcmMono => flags::ADPCM_MONO,
            CompressionMethod::AdpcmStereo => flags::ADPCM_STEREO,
            CompressionMethod::Lzma => flags::LZMA,
            CompressionMethod::Multiple(flags) => flags,
        }
    }

    /// Check if this is a multi-compression method
    pub fn is_multiple(&self) -> bool {
        matches!(self, CompressionMethod::Multiple(_))
    }

    /// Check if this method loses information
    pub fn is_lossy(&self) -> bool {
        self.to_flags() != flags::LZMA
            && self.to_flags() & (flags::ADPCM_MONO | flags::ADPCM_STEREO) != 0
    }

    /// Reject masks that cannot be written unambiguously
    pub fn validate(self) -> Result<Self> {
        let mask = self.to_flags();
        if mask == 0 || mask == flags::LZMA {
            return Ok(self);
        }
        if mask & !flags::CHAINABLE != 0 {
            return Err(Error::invalid_argument(format!(
                "unknown compression bits in mask 0x{mask:02X}"
            )));
        }
        if mask & (flags::ADPCM_MONO | flags::ADPCM_STEREO)
            == flags::ADPCM_MONO | flags::ADPCM_STEREO
        {
            return Err(Error::invalid_argument(
                "ADPCM mono and stereo cannot be combined",
            ));
        }
        // ZLIB | BZIP2 would read back as LZMA
        if mask & (flags::ZLIB | flags::BZIP2) == flags::ZLIB | flags::BZIP2 {
            return Err(Error::invalid_argument(
                "zlib and bzip2 cannot be combined",
            ));
        }
        Ok(self)
    }
}
