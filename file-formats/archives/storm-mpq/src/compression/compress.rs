//! Main compression logic

use super::algorithms;
use super::methods::{CompressionMethod, flags};
use crate::{Error, Result};

/// ADPCM level used when the caller does not pick one
pub const DEFAULT_ADPCM_LEVEL: u8 = 5;

/// Compress data using the specified compression method
///
/// This function returns compressed data in the MPQ format:
/// - the mask of the stages that were actually applied, followed by the payload
/// - or the input itself, with no method byte, when compression does not pay
///   for the extra byte
pub fn compress(data: &[u8], method: u8) -> Result<Vec<u8>> {
    compress_with_level(data, method, DEFAULT_ADPCM_LEVEL)
}

/// Compress data, choosing the ADPCM level for audio stages
pub fn compress_with_level(data: &[u8], method: u8, adpcm_level: u8) -> Result<Vec<u8>> {
    let compression = CompressionMethod::from_flags(method).validate()?;
    if compression == CompressionMethod::None || data.is_empty() {
        return Ok(data.to_vec());
    }

    let (applied, compressed) = if compression == CompressionMethod::Lzma {
        (flags::LZMA, algorithms::lzma::compress(data)?)
    } else {
        compress_chain(data, method, adpcm_level)?
    };

    // MPQ format requires that compression saves space
    if applied == 0 || 1 + compressed.len() >= data.len() {
        log::trace!(
            "Storing {} bytes raw (mask 0x{method:02X} did not shrink them)",
            data.len()
        );
        return Ok(data.to_vec());
    }

    let mut result = Vec::with_capacity(1 + compressed.len());
    result.push(applied);
    result.extend_from_slice(&compressed);
    Ok(result)
}

/// Stages in the order they are applied; decompression runs them backwards
const CHAIN: [u8; 7] = [
    flags::SPARSE,
    flags::ADPCM_MONO,
    flags::ADPCM_STEREO,
    flags::HUFFMAN,
    flags::ZLIB,
    flags::PKWARE,
    flags::BZIP2,
];

fn compress_stage(bit: u8, data: &[u8], adpcm_level: u8) -> Result<Vec<u8>> {
    match bit {
        flags::SPARSE => algorithms::sparse::compress(data),
        flags::ADPCM_MONO => algorithms::adpcm::compress(data, 1, adpcm_level),
        flags::ADPCM_STEREO => algorithms::adpcm::compress(data, 2, adpcm_level),
        flags::HUFFMAN => algorithms::huffman::compress(data),
        flags::ZLIB => algorithms::zlib::compress(data),
        flags::PKWARE => algorithms::pkware::compress(data),
        flags::BZIP2 => algorithms::bzip2::compress(data),
        _ => Err(Error::compression(format!(
            "unknown compression stage 0x{bit:02X}"
        ))),
    }
}

/// Apply every requested stage, dropping the ones that do not shrink the data
///
/// Returns the mask of applied stages and the final payload.
fn compress_chain(data: &[u8], method: u8, adpcm_level: u8) -> Result<(u8, Vec<u8>)> {
    let mut applied = 0u8;
    let mut current = data.to_vec();

    for bit in CHAIN {
        if method & bit == 0 || current.is_empty() {
            continue;
        }

        // ADPCM works on 16-bit samples
        if bit & (flags::ADPCM_MONO | flags::ADPCM_STEREO) != 0 && current.len() % 2 != 0 {
            log::trace!("Skipping ADPCM stage for odd-sized input");
            continue;
        }

        let output = compress_stage(bit, &current, adpcm_level)?;
        if output.len() < current.len() {
            applied |= bit;
            current = output;
        } else {
            log::trace!(
                "Compression stage 0x{bit:02X} grew {} -> {} bytes, skipping",
                current.len(),
                output.len()
            );
        }
    }

    Ok((applied, current))
}
