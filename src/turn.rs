//! Accumulates the decoded audio of one conversational turn.
//!
//! Every decoded block is appended in receipt order, independent of the
//! playback path. On turn completion the blocks are concatenated and encoded
//! into a WAV artifact; the buffer is then cleared for the next turn.

use crate::audio::codec::SampleBlock;
use crate::audio::wav;

pub struct TurnAssembler {
    chunks: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl TurnAssembler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            chunks: Vec::new(),
            sample_rate,
        }
    }

    pub fn push(&mut self, block: SampleBlock) {
        if !block.is_empty() {
            self.chunks.push(block.samples);
        }
    }

    /// Concatenate the accumulated blocks into one WAV artifact.
    ///
    /// Returns `None` when nothing was accumulated (no artifact is published
    /// for an audio-less turn). The buffer is empty afterwards either way.
    pub fn complete(&mut self) -> Option<Vec<u8>> {
        if self.chunks.is_empty() {
            return None;
        }
        let total: usize = self.chunks.iter().map(Vec::len).sum();
        let mut merged = Vec::with_capacity(total);
        for chunk in self.chunks.drain(..) {
            merged.extend_from_slice(&chunk);
        }
        Some(wav::encode_wav(&merged, self.sample_rate))
    }

    /// Discard the in-progress turn.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(len: usize) -> SampleBlock {
        SampleBlock::new(vec![0.5; len], 24000)
    }

    #[test]
    fn concatenates_blocks_into_one_artifact() {
        let mut assembler = TurnAssembler::new(24000);
        assembler.push(block(1000));
        assembler.push(block(1000));
        assembler.push(block(2000));

        let artifact = assembler.complete().unwrap();
        // 4000 samples at 16 bits behind the fixed header
        assert_eq!(artifact.len(), wav::HEADER_LEN + 4000 * 2);
        assert!(assembler.is_empty());
    }

    #[test]
    fn empty_turn_publishes_nothing() {
        let mut assembler = TurnAssembler::new(24000);
        assert!(assembler.complete().is_none());
    }

    #[test]
    fn buffer_resets_between_turns() {
        let mut assembler = TurnAssembler::new(24000);
        assembler.push(block(100));
        assembler.complete().unwrap();

        assembler.push(block(300));
        let artifact = assembler.complete().unwrap();
        assert_eq!(artifact.len(), wav::HEADER_LEN + 300 * 2);
    }

    #[test]
    fn clear_discards_in_flight_audio() {
        let mut assembler = TurnAssembler::new(24000);
        assembler.push(block(100));
        assembler.clear();
        assert!(assembler.complete().is_none());
    }
}
