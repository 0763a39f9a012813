//! Compression and decompression of sector payloads
//!
//! A compressed sector starts with a one-byte method mask followed by the
//! payload produced by chaining the selected algorithms. LZMA is the one
//! exception: its mask value (0x12) is exclusive and never chained.

mod algorithms;
mod compress;
mod decompress;
mod methods;

pub use compress::{DEFAULT_ADPCM_LEVEL, compress, compress_with_level};
pub use decompress::decompress;
pub use methods::{CompressionMethod, flags};

/// Whole-sector PKWARE streams used by imploded members (no method byte)
pub(crate) use algorithms::pkware::{compress as implode, explode};
