//! Zlib compression and decompression

use crate::{Error, Result};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// Decompress a zlib stream, reading at most `max_size` bytes of output
pub(crate) fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take(max_size as u64);
    let mut decompressed = Vec::with_capacity(max_size);

    decoder.read_to_end(&mut decompressed).map_err(|e| {
        log::debug!(
            "Zlib decompression failed: {e}, first bytes: {:02X?}",
            &data[..16.min(data.len())]
        );
        Error::compression(format!("Zlib decompression failed: {e}"))
    })?;

    Ok(decompressed)
}

/// Compress using zlib/deflate
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::compression(format!("Zlib compression failed: {e}")))?;

    encoder
        .finish()
        .map_err(|e| Error::compression(format!("Zlib compression failed: {e}")))
}
