//! PCM16 frame codec and transport encoding.
//!
//! Float sample blocks are the canonical in-memory form; this module owns
//! every conversion to and from the signed 16-bit little-endian wire format,
//! plus the base64 wrapping required because the channel carries text
//! messages. All functions are pure.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::SessionError;

/// Scale factor between float samples in [-1.0, 1.0] and PCM16.
pub const PCM16_SCALE: f32 = 32768.0;

/// A block of mono float samples tagged with its sample rate.
///
/// Capture produces blocks at the input rate; decoded server audio arrives at
/// the fixed output rate. Blocks are single-use values moved from producer to
/// consumer.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Quantize one float sample to PCM16, clamping to the signed 16-bit range.
pub fn quantize(sample: f32) -> i16 {
    (sample * PCM16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

/// Encode float samples into PCM16 little-endian bytes.
///
/// Sample count is preserved exactly; amplitude quantization is the only
/// loss.
pub fn encode16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&quantize(s).to_le_bytes());
    }
    out
}

/// Decode PCM16 little-endian bytes into float samples.
///
/// An odd byte count means a truncated frame.
pub fn decode16(bytes: &[u8]) -> Result<Vec<f32>, SessionError> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::MalformedFrame(format!(
            "odd PCM16 payload length: {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Wrap binary audio in the text encoding the transport requires.
pub fn to_transport(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Undo the transport text encoding.
pub fn from_transport(text: &str) -> Result<Vec<u8>, SessionError> {
    BASE64
        .decode(text)
        .map_err(|e| SessionError::MalformedFrame(format!("transport decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_one_quantization_step() {
        let block: Vec<f32> = (0..1000).map(|i| (i as f32 / 500.0) - 1.0).collect();
        let decoded = decode16(&encode16(&block)).unwrap();
        assert_eq!(decoded.len(), block.len());
        for (orig, back) in block.iter().zip(&decoded) {
            assert!(
                (orig - back).abs() <= 1.0 / PCM16_SCALE,
                "sample {orig} came back as {back}"
            );
        }
    }

    #[test]
    fn out_of_range_samples_clamp() {
        let bytes = encode16(&[2.0, -2.0, 1.0, -1.0]);
        let vals: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(vals, vec![32767, -32768, 32767, -32768]);
    }

    #[test]
    fn odd_length_payload_is_malformed() {
        let err = decode16(&[0u8, 1, 2]).unwrap_err();
        assert!(matches!(err, SessionError::MalformedFrame(_)));
    }

    #[test]
    fn transport_round_trip() {
        let bytes = encode16(&[0.25, -0.5, 0.75]);
        let text = to_transport(&bytes);
        assert_eq!(from_transport(&text).unwrap(), bytes);
    }

    #[test]
    fn invalid_transport_text_is_malformed() {
        let err = from_transport("not base64 !!!").unwrap_err();
        assert!(matches!(err, SessionError::MalformedFrame(_)));
    }

    #[test]
    fn block_duration() {
        let block = SampleBlock::new(vec![0.0; 24000], 24000);
        assert!((block.duration_secs() - 1.0).abs() < f64::EPSILON);
    }
}
