//! BZip2 compression and decompression

use crate::{Error, Result};
use bzip2::Compression;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use std::io::{Read, Write};

/// Decompress a bzip2 stream, reading at most `max_size` bytes of output
pub(crate) fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut decoder = BzDecoder::new(data).take(max_size as u64);
    let mut decompressed = Vec::with_capacity(max_size);

    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::compression(format!("BZip2 decompression failed: {e}")))?;

    Ok(decompressed)
}

/// Compress using BZip2
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::compression(format!("BZip2 compression failed: {e}")))?;

    encoder
        .finish()
        .map_err(|e| Error::compression(format!("BZip2 compression failed: {e}")))
}
