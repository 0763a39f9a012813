//! LZMA compression and decompression
//!
//! Archive sectors carry one filter byte (always zero) in front of an
//! `.lzma` stream with its usual 13-byte properties header.

use crate::{Error, Result};
use std::io::{BufReader, Cursor};

/// Filter byte meaning "no filter"
const FILTER_NONE: u8 = 0x00;

/// Decompress an LZMA payload
pub(crate) fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let (&filter, stream) = data
        .split_first()
        .ok_or_else(|| Error::compression("Empty LZMA payload"))?;
    if filter != FILTER_NONE {
        return Err(Error::unsupported(format!("LZMA filter 0x{filter:02X}")));
    }

    let mut input = BufReader::new(Cursor::new(stream));
    let mut output = Vec::with_capacity(max_size);
    lzma_rs::lzma_decompress(&mut input, &mut output).map_err(|e| {
        log::debug!(
            "LZMA decompression failed, first bytes: {:02X?}",
            &stream[..16.min(stream.len())]
        );
        Error::compression(format!("LZMA decompression failed: {e:?}"))
    })?;

    output.truncate(max_size);
    Ok(output)
}

/// Compress using LZMA
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut input = BufReader::new(Cursor::new(data));
    let mut output = vec![FILTER_NONE];

    lzma_rs::lzma_compress(&mut input, &mut output)
        .map_err(|e| Error::compression(format!("LZMA compression failed: {e:?}")))?;
    Ok(output)
}
