//! Copying stages
//!
//! A [`CopyStage`] acquires a buffer from upstream, converts as many frames as
//! fit into its local buffer, and serves them downstream. The upstream buffer
//! is held until every frame of it has been released downstream.

use super::{BufferProvider, ProviderStage};
use crate::buffer::AlignedBuf;
use crate::format::convert_samples;
use crate::types::AudioFormat;

/// Per-frame conversion performed by a [`CopyStage`]
pub trait CopyFrames {
    /// Bytes per upstream frame
    fn input_frame_size(&self) -> usize;

    /// Bytes per served frame
    fn output_frame_size(&self) -> usize;

    /// Convert `frames` frames from `src` into `dst`
    fn copy_frames(&mut self, dst: &mut [u8], src: &[u8], frames: usize);
}

/// Stage that converts upstream frames into a local buffer
pub struct CopyStage<C> {
    conv: C,
    local: AlignedBuf,
    local_frames: usize,
    /// Frames of the held upstream buffer (0 = none held)
    held: usize,
    /// Frames of the held upstream buffer already released downstream
    consumed: usize,
    /// Frames currently served from `local`
    served: usize,
}

impl<C: CopyFrames> CopyStage<C> {
    /// Stage with room for `local_frames` converted frames
    pub fn new(conv: C, local_frames: usize) -> Self {
        let local_frames = local_frames.max(1);
        let local = AlignedBuf::new(local_frames * conv.output_frame_size());
        Self {
            conv,
            local,
            local_frames,
            held: 0,
            consumed: 0,
            served: 0,
        }
    }

    pub fn converter(&self) -> &C {
        &self.conv
    }
}

impl<C: CopyFrames> ProviderStage for CopyStage<C> {
    fn get_next_buffer(&mut self, upstream: &mut dyn BufferProvider, frames: usize) -> Option<usize> {
        if self.held == 0 {
            self.held = upstream.get_next_buffer(frames)?;
            self.consumed = 0;
        }
        let count = self.local_frames.min(self.held - self.consumed).min(frames);
        let in_size = self.conv.input_frame_size();
        let out_size = self.conv.output_frame_size();
        let src = upstream.buffer();
        let start = self.consumed * in_size;
        self.conv.copy_frames(
            &mut self.local.as_bytes_mut()[..count * out_size],
            &src[start..start + count * in_size],
            count,
        );
        self.served = count;
        Some(count)
    }

    fn buffer(&self) -> &[u8] {
        &self.local.as_bytes()[..self.served * self.conv.output_frame_size()]
    }

    fn release_buffer(&mut self, upstream: &mut dyn BufferProvider, frames: usize) {
        if self.held == 0 {
            return;
        }
        self.consumed += frames.min(self.served);
        self.served = 0;
        if self.consumed != 0 && self.consumed >= self.held {
            upstream.release_buffer(self.held);
            self.held = 0;
            self.consumed = 0;
        }
    }

    fn teardown(&mut self, upstream: &mut dyn BufferProvider) {
        if self.held != 0 {
            upstream.release_buffer(self.consumed);
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.held = 0;
        self.consumed = 0;
        self.served = 0;
    }
}

/// Sample format conversion
#[derive(Debug, Clone, Copy)]
pub struct Reformat {
    channels: usize,
    input: AudioFormat,
    output: AudioFormat,
}

impl Reformat {
    pub fn new(channels: usize, input: AudioFormat, output: AudioFormat) -> Self {
        Self {
            channels,
            input,
            output,
        }
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input
    }

    pub fn output_format(&self) -> AudioFormat {
        self.output
    }
}

impl CopyFrames for Reformat {
    fn input_frame_size(&self) -> usize {
        self.input.frame_size(self.channels)
    }

    fn output_frame_size(&self) -> usize {
        self.output.frame_size(self.channels)
    }

    fn copy_frames(&mut self, dst: &mut [u8], src: &[u8], frames: usize) {
        convert_samples(dst, self.output, src, self.input, frames * self.channels);
    }
}

/// Stage converting between linear PCM formats
pub type ReformatStage = CopyStage<Reformat>;

impl ReformatStage {
    pub fn reformat(
        channels: usize,
        input: AudioFormat,
        output: AudioFormat,
        local_frames: usize,
    ) -> Self {
        CopyStage::new(Reformat::new(channels, input, output), local_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;

    fn read_f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn test_local_buffer_limits_each_get() {
        let mut upstream = FakeProvider::from_i16(&[0, 8192, 16384, -8192, -16384], 1);
        let gets = upstream.gets.clone();
        let mut stage = ReformatStage::reformat(1, AudioFormat::Pcm16Bit, AudioFormat::PcmFloat, 2);

        assert_eq!(stage.get_next_buffer(&mut upstream, 5), Some(2));
        assert_eq!(read_f32s(stage.buffer()), vec![0.0, 0.25]);
        stage.release_buffer(&mut upstream, 2);

        assert_eq!(stage.get_next_buffer(&mut upstream, 5), Some(2));
        assert_eq!(read_f32s(stage.buffer()), vec![0.5, -0.25]);
        stage.release_buffer(&mut upstream, 2);

        assert_eq!(stage.get_next_buffer(&mut upstream, 5), Some(1));
        assert_eq!(read_f32s(stage.buffer()), vec![-0.5]);
        stage.release_buffer(&mut upstream, 1);

        // One upstream acquisition served all three gets
        assert_eq!(gets.get(), 1);
        assert!(stage.get_next_buffer(&mut upstream, 5).is_none());
    }

    #[test]
    fn test_upstream_released_once_fully_consumed() {
        let mut upstream = FakeProvider::from_i16(&[1, 2, 3], 1);
        let releases = upstream.releases.clone();
        let mut stage = ReformatStage::reformat(1, AudioFormat::Pcm16Bit, AudioFormat::PcmFloat, 8);

        assert_eq!(stage.get_next_buffer(&mut upstream, 3), Some(3));
        stage.release_buffer(&mut upstream, 2);
        assert_eq!(releases.get(), 0);
        assert_eq!(stage.get_next_buffer(&mut upstream, 3), Some(1));
        stage.release_buffer(&mut upstream, 1);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn test_reset_forgets_held_buffer() {
        let mut upstream = FakeProvider::from_i16(&[1, 2], 1);
        let mut stage = ReformatStage::reformat(1, AudioFormat::Pcm16Bit, AudioFormat::Pcm16Bit, 8);
        assert_eq!(stage.get_next_buffer(&mut upstream, 2), Some(2));
        stage.reset();
        assert!(stage.buffer().is_empty());
        // Release after reset is ignored
        stage.release_buffer(&mut upstream, 2);
    }

    #[test]
    fn test_stereo_frame_sizes() {
        let conv = Reformat::new(2, AudioFormat::Pcm24BitPacked, AudioFormat::PcmFloat);
        assert_eq!(conv.input_frame_size(), 6);
        assert_eq!(conv.output_frame_size(), 8);
        assert_eq!(conv.input_format(), AudioFormat::Pcm24BitPacked);
    }
}
