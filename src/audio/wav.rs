//! Uncompressed PCM WAV container encoder.
//!
//! Produces a 44-byte RIFF/WAVE header followed by the 16-bit-quantized
//! samples. Always little-endian regardless of platform; deterministic for a
//! given input.

use bytes::BufMut;

use super::codec;

/// Fixed header size: RIFF descriptor + fmt chunk + data chunk descriptor.
pub const HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Encode a mono float sample sequence into a complete WAV file.
///
/// Empty input yields a header-only artifact.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data = codec::encode16(samples);
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + data.len());
    out.put_slice(b"RIFF");
    out.put_u32_le(36 + data.len() as u32);
    out.put_slice(b"WAVE");

    out.put_slice(b"fmt ");
    out.put_u32_le(16); // fmt chunk size
    out.put_u16_le(1); // PCM format tag
    out.put_u16_le(CHANNELS);
    out.put_u32_le(sample_rate);
    out.put_u32_le(byte_rate);
    out.put_u16_le(block_align);
    out.put_u16_le(BITS_PER_SAMPLE);

    out.put_slice(b"data");
    out.put_u32_le(data.len() as u32);
    out.put_slice(&data);
    out
}
