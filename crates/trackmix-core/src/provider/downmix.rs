//! Channel layout conversion stages
//!
//! - [`Downmix`]: folds a positional multichannel layout to stereo with fixed
//!   speaker weights. Works on 16-bit PCM only and refuses layouts it cannot
//!   fold.
//! - [`Remix`]: copies channels by position or by index into the target
//!   layout, leaving absent channels silent. Works on any sample format and
//!   always succeeds.

use super::CopyStage;
use super::CopyFrames;
use crate::format::clamp16;
use crate::types::{position, AudioFormat, ChannelMask, MAX_NUM_CHANNELS_TO_DOWNMIX};

/// -3 dB
const MINUS_3_DB: f32 = 0.707_106_77;

/// Stereo weights of a speaker position, `None` when it cannot be folded
fn fold_weights(bit: u32) -> Option<(f32, f32)> {
    let w = match bit {
        position::FRONT_LEFT | position::FRONT_LEFT_OF_CENTER => (1.0, 0.0),
        position::FRONT_RIGHT | position::FRONT_RIGHT_OF_CENTER => (0.0, 1.0),
        position::FRONT_CENTER | position::LOW_FREQUENCY | position::BACK_CENTER => {
            (MINUS_3_DB, MINUS_3_DB)
        }
        position::BACK_LEFT | position::SIDE_LEFT => (MINUS_3_DB, 0.0),
        position::BACK_RIGHT | position::SIDE_RIGHT => (0.0, MINUS_3_DB),
        _ => return None,
    };
    Some(w)
}

/// Set bits of a mask, lowest first
fn mask_bits(bits: u32) -> impl Iterator<Item = u32> {
    (0..32).map(|i| 1u32 << i).filter(move |b| bits & b != 0)
}

/// Positional multichannel to stereo fold, 16-bit PCM
#[derive(Debug, Clone)]
pub struct Downmix {
    weights: Vec<(f32, f32)>,
}

impl Downmix {
    /// Format the fold operates in
    pub const FORMAT: AudioFormat = AudioFormat::Pcm16Bit;

    /// Fold from `input` to `output`, if supported
    pub fn new(input: ChannelMask, output: ChannelMask) -> Option<Self> {
        let ChannelMask::Position(bits) = input else {
            return None;
        };
        if output != ChannelMask::STEREO || input.count() > MAX_NUM_CHANNELS_TO_DOWNMIX {
            return None;
        }
        let weights = mask_bits(bits).map(fold_weights).collect::<Option<Vec<_>>>()?;
        if weights.is_empty() {
            return None;
        }
        Some(Self { weights })
    }
}

impl CopyFrames for Downmix {
    fn input_frame_size(&self) -> usize {
        Self::FORMAT.frame_size(self.weights.len())
    }

    fn output_frame_size(&self) -> usize {
        Self::FORMAT.frame_size(2)
    }

    fn copy_frames(&mut self, dst: &mut [u8], src: &[u8], frames: usize) {
        let in_size = self.input_frame_size();
        for (out, frame) in dst
            .chunks_exact_mut(4)
            .zip(src.chunks_exact(in_size))
            .take(frames)
        {
            let mut left = 0.0f32;
            let mut right = 0.0f32;
            for (sample, &(wl, wr)) in frame.chunks_exact(2).zip(&self.weights) {
                let v = i16::from_ne_bytes([sample[0], sample[1]]) as f32;
                left += v * wl;
                right += v * wr;
            }
            out[..2].copy_from_slice(&clamp16(left.round() as i32).to_ne_bytes());
            out[2..].copy_from_slice(&clamp16(right.round() as i32).to_ne_bytes());
        }
    }
}

/// Stage running the stereo downmix fold
pub type DownmixStage = CopyStage<Downmix>;

impl DownmixStage {
    pub fn downmix(input: ChannelMask, output: ChannelMask, local_frames: usize) -> Option<Self> {
        Downmix::new(input, output).map(|d| CopyStage::new(d, local_frames))
    }
}

/// Channel copy by position or index
#[derive(Debug, Clone)]
pub struct Remix {
    /// Source channel of every output channel
    map: Vec<Option<usize>>,
    in_channels: usize,
    sample_size: usize,
}

impl Remix {
    pub fn new(input: ChannelMask, output: ChannelMask, format: AudioFormat) -> Self {
        let in_bits: Vec<u32> = mask_bits(input.bits()).collect();
        let map = match (input, output) {
            (ChannelMask::Position(_), ChannelMask::Position(_))
            | (ChannelMask::Index(_), ChannelMask::Index(_)) => mask_bits(output.bits())
                .map(|bit| in_bits.iter().position(|&b| b == bit))
                .collect(),
            // Mixed representations pair channels by order
            _ => (0..output.count())
                .map(|j| (j < in_bits.len()).then_some(j))
                .collect(),
        };
        Self {
            map,
            in_channels: input.count(),
            sample_size: format.bytes_per_sample(),
        }
    }

    /// Source channel of each output channel
    pub fn map(&self) -> &[Option<usize>] {
        &self.map
    }
}

impl CopyFrames for Remix {
    fn input_frame_size(&self) -> usize {
        self.in_channels * self.sample_size
    }

    fn output_frame_size(&self) -> usize {
        self.map.len() * self.sample_size
    }

    fn copy_frames(&mut self, dst: &mut [u8], src: &[u8], frames: usize) {
        let ss = self.sample_size;
        let in_size = self.input_frame_size();
        let out_size = self.output_frame_size();
        if in_size == 0 || out_size == 0 {
            return;
        }
        for (out, frame) in dst
            .chunks_exact_mut(out_size)
            .zip(src.chunks_exact(in_size))
            .take(frames)
        {
            for (slot, src_ch) in out.chunks_exact_mut(ss).zip(&self.map) {
                match src_ch {
                    Some(c) => slot.copy_from_slice(&frame[c * ss..(c + 1) * ss]),
                    None => slot.fill(0),
                }
            }
        }
    }
}

/// Stage running the channel copy
pub type RemixStage = CopyStage<Remix>;

impl RemixStage {
    pub fn remix(
        input: ChannelMask,
        output: ChannelMask,
        format: AudioFormat,
        local_frames: usize,
    ) -> Self {
        CopyStage::new(Remix::new(input, output, format), local_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;
    use crate::provider::ProviderStage;

    fn read_i16s(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_downmix_support() {
        assert!(Downmix::new(ChannelMask::SURROUND_5_1, ChannelMask::STEREO).is_some());
        assert!(Downmix::new(ChannelMask::SURROUND_7_1, ChannelMask::STEREO).is_some());
        assert!(Downmix::new(ChannelMask::index_of_count(4), ChannelMask::STEREO).is_none());
        assert!(Downmix::new(ChannelMask::SURROUND_5_1, ChannelMask::QUAD).is_none());
        let top = ChannelMask::Position(position::FRONT_LEFT | position::TOP_CENTER);
        assert!(Downmix::new(top, ChannelMask::STEREO).is_none());
    }

    #[test]
    fn test_downmix_5_1_fold() {
        // FL FR FC LFE BL BR
        let frame: [i16; 6] = [1000, 2000, 1000, 0, 1000, 0];
        let mut upstream = FakeProvider::from_i16(&frame, 6);
        let mut stage = DownmixStage::downmix(ChannelMask::SURROUND_5_1, ChannelMask::STEREO, 16)
            .expect("5.1 folds to stereo");
        assert_eq!(stage.get_next_buffer(&mut upstream, 1), Some(1));
        let out = read_i16s(stage.buffer());
        let left = (1000.0 + 1000.0 * MINUS_3_DB + 1000.0 * MINUS_3_DB).round() as i16;
        let right = (2000.0 + 1000.0 * MINUS_3_DB).round() as i16;
        assert_eq!(out, vec![left, right]);
    }

    #[test]
    fn test_downmix_saturates() {
        let frame: [i16; 6] = [i16::MAX; 6];
        let mut upstream = FakeProvider::from_i16(&frame, 6);
        let mut stage = DownmixStage::downmix(ChannelMask::SURROUND_5_1, ChannelMask::STEREO, 16)
            .expect("5.1 folds to stereo");
        stage.get_next_buffer(&mut upstream, 1);
        assert_eq!(read_i16s(stage.buffer()), vec![i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_remix_by_position() {
        let remix = Remix::new(ChannelMask::STEREO, ChannelMask::SURROUND_5_1, AudioFormat::Pcm16Bit);
        assert_eq!(remix.map(), &[Some(0), Some(1), None, None, None, None]);

        let remix = Remix::new(ChannelMask::SURROUND_5_1, ChannelMask::QUAD, AudioFormat::Pcm16Bit);
        assert_eq!(remix.map(), &[Some(0), Some(1), Some(4), Some(5)]);
    }

    #[test]
    fn test_remix_by_index() {
        let remix = Remix::new(
            ChannelMask::index_of_count(3),
            ChannelMask::STEREO,
            AudioFormat::PcmFloat,
        );
        assert_eq!(remix.map(), &[Some(0), Some(1)]);

        let remix = Remix::new(
            ChannelMask::index_of_count(1),
            ChannelMask::index_of_count(2),
            AudioFormat::PcmFloat,
        );
        assert_eq!(remix.map(), &[Some(0), None]);
    }

    #[test]
    fn test_remix_stage_copies_samples() {
        let mut upstream = FakeProvider::from_i16(&[10, 20, 30, 40], 2);
        let mut stage = RemixStage::remix(ChannelMask::STEREO, ChannelMask::QUAD, AudioFormat::Pcm16Bit, 16);
        assert_eq!(stage.get_next_buffer(&mut upstream, 2), Some(2));
        assert_eq!(read_i16s(stage.buffer()), vec![10, 20, 0, 0, 30, 40, 0, 0]);
    }
}
