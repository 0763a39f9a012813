//! Main decompression logic and multi-compression handling

use super::algorithms;
use super::methods::{CompressionMethod, flags};
use crate::{Error, Result};

/// Decompress the payload of a compressed unit
///
/// `data` is the payload after the method byte and `method` the method byte
/// itself. `expected_size` bounds what each stage may produce; the sector
/// layer checks the final size.
pub fn decompress(data: &[u8], method: u8, expected_size: usize) -> Result<Vec<u8>> {
    if method == 0 {
        return Ok(data.to_vec());
    }

    log::trace!(
        "Decompressing {} bytes to {} bytes with method 0x{:02X}",
        data.len(),
        expected_size,
        method
    );

    match CompressionMethod::from_flags(method) {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Lzma => algorithms::lzma::decompress(data, expected_size),
        CompressionMethod::Multiple(mask) if mask & !flags::CHAINABLE != 0 => Err(
            Error::unsupported(format!("compression method 0x{mask:02X}")),
        ),
        _ => decompress_chain(data, method, expected_size),
    }
}

/// Undo the stages named in `mask`, last applied first
fn decompress_chain(data: &[u8], mask: u8, expected_size: usize) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for bit in [
        flags::BZIP2,
        flags::PKWARE,
        flags::ZLIB,
        flags::HUFFMAN,
        flags::ADPCM_STEREO,
        flags::ADPCM_MONO,
        flags::SPARSE,
    ] {
        if mask & bit == 0 {
            continue;
        }

        current = match bit {
            flags::BZIP2 => algorithms::bzip2::decompress(&current, expected_size)?,
            flags::PKWARE => algorithms::pkware::decompress(&current, expected_size)?,
            flags::ZLIB => algorithms::zlib::decompress(&current, expected_size)?,
            flags::HUFFMAN => algorithms::huffman::decompress(&current, expected_size)?,
            flags::ADPCM_STEREO => algorithms::adpcm::decompress(&current, 2, expected_size)?,
            flags::ADPCM_MONO => algorithms::adpcm::decompress(&current, 1, expected_size)?,
            _ => algorithms::sparse::decompress(&current, expected_size)?,
        };
        log::trace!("Stage 0x{bit:02X} produced {} bytes", current.len());
    }

    Ok(current)
}
