//! PKWare DCL compression using pklib

use crate::{Error, Result};
use pklib::{CompressionMode, DictionarySize, explode_bytes, implode_bytes};

/// Pick the dictionary the way the reference tools do: bigger inputs get a
/// bigger window
fn dictionary_bytes_for(len: usize) -> usize {
    if len < 0x600 {
        0x400
    } else if len < 0xC00 {
        0x800
    } else {
        0x1000
    }
}

/// Compress data using the PKWare DCL algorithm in binary mode
///
/// Every stream is exploded again before it is returned. When no dictionary
/// up to the preferred size reproduces the input, the input itself is
/// returned so the caller sees no gain and stores the data raw.
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let preferred = dictionary_bytes_for(data.len());
    let candidates = [
        (0x1000, DictionarySize::Size4K),
        (0x800, DictionarySize::Size2K),
        (0x400, DictionarySize::Size1K),
    ];
    for (bytes, dictionary) in candidates {
        if bytes > preferred {
            continue;
        }
        let compressed = implode_bytes(data, CompressionMode::Binary, dictionary)
            .map_err(|e| Error::compression(format!("PKWare compression failed: {e}")))?;
        if explode_bytes(&compressed).is_ok_and(|restored| restored == data) {
            return Ok(compressed);
        }
        log::debug!(
            "PKWare stream with a {bytes} byte dictionary did not reproduce {} input bytes",
            data.len()
        );
    }

    Ok(data.to_vec())
}

/// Decompress one PKWare stage of a chain, producing at most `max_size` bytes
pub(crate) fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let output = explode_bytes(data).map_err(|e| {
        log::debug!(
            "PKWare decompression failed with input size {}: {e}",
            data.len()
        );
        Error::compression(format!("PKWare decompression failed: {e}"))
    })?;
    if output.len() > max_size {
        return Err(Error::compression(format!(
            "PKWare stream expanded to {} bytes, at most {max_size} expected",
            output.len()
        )));
    }
    Ok(output)
}

/// Explode a whole imploded sector, which must yield exactly `expected_size` bytes
pub(crate) fn explode(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let output = decompress(data, expected_size)?;
    if output.len() != expected_size {
        return Err(Error::compression(format!(
            "imploded sector expanded to {} bytes, expected {expected_size}",
            output.len()
        )));
    }
    Ok(output)
}
