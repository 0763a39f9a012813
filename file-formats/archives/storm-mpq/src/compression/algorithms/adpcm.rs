//! IMA ADPCM compression for 16-bit PCM audio
//!
//! The stream starts with a zero byte and the bit shift (`level - 1`), then
//! the first sample of every channel verbatim. Each following byte encodes one
//! sample of the next channel in turn, except for the two control codes:
//! `0x80` repeats the prediction with a smaller step and `0x81` grows the step
//! without emitting a sample.

use crate::{Error, Result};

/// Maximum number of channels supported
const MAX_CHANNELS: usize = 2;

/// Step index every channel starts from
const INITIAL_STEP_INDEX: usize = 0x2C;

/// Highest valid index into [`STEP_SIZE_TABLE`]
const MAX_STEP_INDEX: usize = 0x58;

/// Step index adjustment, indexed by the low five bits of an encoded sample
const NEXT_STEP_TABLE: [i8; 32] = [
    -1, 0, -1, 4, -1, 2, -1, 6, -1, 1, -1, 5, -1, 3, -1, 7, -1, 1, -1, 5, -1, 3, -1, 7, -1, 2, -1,
    4, -1, 6, -1, 8,
];

const STEP_SIZE_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408, 449,
    494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066, 2272,
    2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630, 9493,
    10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794, 32767,
];

const SIGN_BIT: u8 = 0x40;
const CODE_REPEAT: u8 = 0x80;
const CODE_GROW: u8 = 0x81;

/// Predictor state of one channel
#[derive(Debug, Clone, Copy)]
struct Channel {
    predicted: i32,
    step_index: usize,
}

impl Channel {
    fn new(first_sample: i16) -> Self {
        Self {
            predicted: first_sample as i32,
            step_index: INITIAL_STEP_INDEX,
        }
    }

    fn step_size(&self) -> i32 {
        STEP_SIZE_TABLE[self.step_index]
    }

    fn shrink_step(&mut self) {
        self.step_index = self.step_index.saturating_sub(1);
    }

    fn grow_step(&mut self) {
        self.step_index = (self.step_index + 8).min(MAX_STEP_INDEX);
    }

    fn adapt_step(&mut self, encoded: u8) {
        let next = self.step_index as i32 + NEXT_STEP_TABLE[(encoded & 0x1F) as usize] as i32;
        self.step_index = next.clamp(0, MAX_STEP_INDEX as i32) as usize;
    }

    fn apply(&mut self, encoded: u8, difference: i32) {
        let next = if encoded & SIGN_BIT != 0 {
            self.predicted - difference
        } else {
            self.predicted + difference
        };
        self.predicted = next.clamp(i16::MIN as i32, i16::MAX as i32);
    }
}

fn check_channels(channels: usize) -> Result<()> {
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(Error::compression(format!(
            "ADPCM supports 1 to {MAX_CHANNELS} channels, got {channels}"
        )));
    }
    Ok(())
}

fn read_samples(input: &[u8]) -> impl Iterator<Item = i16> + '_ {
    input
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Compress little-endian 16-bit samples
///
/// `level` trades precision for size; higher levels keep more bits per sample.
pub(crate) fn compress(input: &[u8], channels: usize, level: u8) -> Result<Vec<u8>> {
    check_channels(channels)?;
    if input.len() % 2 != 0 {
        return Err(Error::compression("ADPCM input must be 16-bit aligned"));
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let level = level.clamp(1, 6);
    let bit_shift = level - 1;
    let mut samples = read_samples(input);

    let mut output = Vec::with_capacity(input.len() / 2 + 8);
    output.push(0);
    output.push(bit_shift);

    let mut state = Vec::with_capacity(channels);
    for sample in samples.by_ref().take(channels) {
        output.extend_from_slice(&sample.to_le_bytes());
        state.push(Channel::new(sample));
    }

    let max_bit_mask: i32 = if bit_shift > 0 {
        (1i32 << (bit_shift - 1)).min(0x20)
    } else {
        0
    };

    let channel_count = state.len();
    for (i, sample) in samples.enumerate() {
        let channel = &mut state[i % channel_count];

        let mut encoded = 0u8;
        let mut abs_difference = sample as i32 - channel.predicted;
        if abs_difference < 0 {
            abs_difference = -abs_difference;
            encoded |= SIGN_BIT;
        }

        let mut step_size = channel.step_size();
        if abs_difference < (step_size >> level) {
            channel.shrink_step();
            output.push(CODE_REPEAT);
            continue;
        }

        while abs_difference > (step_size << 1) && channel.step_index < MAX_STEP_INDEX {
            channel.grow_step();
            step_size = channel.step_size();
            output.push(CODE_GROW);
        }

        let difference = step_size >> bit_shift;
        let mut total = 0;
        let mut bit_value = 1;
        while bit_value <= max_bit_mask {
            if total + step_size <= abs_difference {
                total += step_size;
                encoded |= bit_value as u8;
            }
            step_size >>= 1;
            bit_value <<= 1;
        }

        channel.apply(encoded, difference + total);
        output.push(encoded);
        channel.adapt_step(encoded);
    }

    Ok(output)
}

/// Decompress an ADPCM stream, producing at most `max_size` bytes
pub(crate) fn decompress(input: &[u8], channels: usize, max_size: usize) -> Result<Vec<u8>> {
    check_channels(channels)?;
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let header_len = 2 + 2 * channels;
    if input.len() < header_len {
        return Err(Error::compression(format!(
            "ADPCM stream of {} bytes is shorter than its header",
            input.len()
        )));
    }

    let bit_shift = input[1] as i32;
    let mut output = Vec::with_capacity(max_size);
    let mut state: Vec<Channel> = read_samples(&input[2..header_len])
        .map(|sample| {
            output.extend_from_slice(&sample.to_le_bytes());
            Channel::new(sample)
        })
        .collect();

    let mut index = channels - 1;
    for &encoded in &input[header_len..] {
        if output.len() >= max_size {
            break;
        }
        index = (index + 1) % channels;
        let channel = &mut state[index];

        match encoded {
            CODE_REPEAT => {
                channel.shrink_step();
                output.extend_from_slice(&(channel.predicted as i16).to_le_bytes());
            }
            CODE_GROW => {
                channel.grow_step();
                // The next byte belongs to the same channel
                index = (index + channels - 1) % channels;
            }
            _ => {
                let step_size = channel.step_size();
                let mut difference = step_size >> bit_shift;
                for bit in 0..6 {
                    if encoded & (1 << bit) != 0 {
                        difference += step_size >> bit;
                    }
                }
                channel.apply(encoded, difference);
                output.extend_from_slice(&(channel.predicted as i16).to_le_bytes());
                channel.adapt_step(encoded);
            }
        }
    }

    output.truncate(max_size);
    Ok(output)
}
