//! Sparse compression: run-length coding of zero bytes
//!
//! Layout: the decompressed size as a big-endian `u32`, then a sequence of
//! chunks. A control byte with the high bit set is followed by
//! `(byte & 0x7F) + 1` literal bytes; any other control byte stands for
//! `byte + 3` zeros.

use crate::{Error, Result};

const MAX_LITERAL_RUN: usize = 0x80;
const MIN_ZERO_RUN: usize = 3;
const MAX_ZERO_RUN: usize = 0x7F + MIN_ZERO_RUN;

/// Compress using sparse compression
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let size = u32::try_from(data.len())
        .map_err(|_| Error::compression("Sparse input larger than 4 GiB"))?;

    let mut output = Vec::with_capacity(4 + data.len() + data.len() / MAX_LITERAL_RUN + 1);
    output.extend_from_slice(&size.to_be_bytes());

    let mut literal_start = 0;
    let mut pos = 0;
    while pos < data.len() {
        let zeros = data[pos..].iter().take_while(|&&b| b == 0).count();
        if zeros < MIN_ZERO_RUN {
            pos += zeros.max(1);
            continue;
        }

        flush_literals(&mut output, &data[literal_start..pos]);

        let mut remaining = zeros;
        while remaining >= MIN_ZERO_RUN {
            let run = remaining.min(MAX_ZERO_RUN);
            output.push((run - MIN_ZERO_RUN) as u8);
            remaining -= run;
        }
        pos += zeros - remaining;
        literal_start = pos;
    }
    flush_literals(&mut output, &data[literal_start..]);

    Ok(output)
}

fn flush_literals(output: &mut Vec<u8>, literals: &[u8]) {
    for chunk in literals.chunks(MAX_LITERAL_RUN) {
        output.push(0x80 | (chunk.len() - 1) as u8);
        output.extend_from_slice(chunk);
    }
}

/// Decompress sparse data, refusing to produce more than `max_size` bytes
pub(crate) fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(Error::compression(format!(
            "Sparse stream of {} bytes has no size header",
            data.len()
        )));
    }

    let stored_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if stored_size > max_size {
        return Err(Error::compression(format!(
            "Sparse stream claims {stored_size} bytes, at most {max_size} expected"
        )));
    }

    let mut output = Vec::with_capacity(stored_size);
    let mut pos = 4;
    while pos < data.len() && output.len() < stored_size {
        let control = data[pos];
        pos += 1;
        let room = stored_size - output.len();

        if control & 0x80 != 0 {
            let run = (control & 0x7F) as usize + 1;
            let literals = data
                .get(pos..pos + run)
                .ok_or_else(|| Error::compression("Sparse literal run past end of input"))?;
            output.extend_from_slice(&literals[..run.min(room)]);
            pos += run;
        } else {
            let run = (control as usize + MIN_ZERO_RUN).min(room);
            output.resize(output.len() + run, 0);
        }
    }

    Ok(output)
}
