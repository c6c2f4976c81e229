//! Speed and pitch adapter via signalsmith-stretch
//!
//! Sits last in the chain and works in the mixer-internal format. At unity
//! rate frames are copied through untouched; otherwise each get pulls about
//! `frames × speed` input frames and stretches them to `frames` output frames.
//!
//! ## Invalid rates
//!
//! | Fallback | Behavior                                  |
//! |----------|-------------------------------------------|
//! | Mute     | input is consumed, output is silence      |
//! | Default  | speed and pitch are clamped into range    |
//! | Fail     | same as Default                           |

use signalsmith_stretch::Stretch;

use super::{BufferProvider, ProviderStage};
use crate::buffer::AlignedBuf;
use crate::format::{clamp16_from_float, sample_to_f32};
use crate::types::{
    AudioFormat, PlaybackRate, StretchFallback, StretchMode, TIMESTRETCH_PITCH_MAX,
    TIMESTRETCH_PITCH_MIN, TIMESTRETCH_PITCH_MIN_DELTA, TIMESTRETCH_SPEED_MAX,
    TIMESTRETCH_SPEED_MIN, TIMESTRETCH_SPEED_MIN_DELTA,
};

/// Time stretch stage
pub struct TimestretchStage {
    stretcher: Stretch,
    channels: usize,
    format: AudioFormat,
    sample_rate: u32,
    rate: PlaybackRate,
    /// Effective speed and pitch after fallback handling
    speed: f32,
    pitch: f32,
    muted: bool,
    local: AlignedBuf,
    local_frames: usize,
    in_scratch: Vec<f32>,
    out_scratch: Vec<f32>,
    /// Frames produced into `local`
    produced: usize,
    /// Frames of `local` already released downstream
    consumed: usize,
    /// Frames of `local` served by the last get
    served: usize,
}

impl TimestretchStage {
    /// Stage for `channels` channels of `format` at `sample_rate`
    pub fn new(
        channels: usize,
        format: AudioFormat,
        sample_rate: u32,
        rate: PlaybackRate,
        local_frames: usize,
    ) -> Self {
        let local_frames = local_frames.max(1);
        let mut stage = Self {
            stretcher: Self::make_stretcher(channels, sample_rate, rate.stretch_mode),
            channels,
            format,
            sample_rate,
            rate,
            speed: 1.0,
            pitch: 1.0,
            muted: false,
            local: AlignedBuf::new(local_frames * format.frame_size(channels)),
            local_frames,
            in_scratch: Vec::new(),
            out_scratch: vec![0.0; local_frames * channels],
            produced: 0,
            consumed: 0,
            served: 0,
        };
        stage.apply_rate();
        stage
    }

    fn make_stretcher(channels: usize, sample_rate: u32, mode: StretchMode) -> Stretch {
        match mode {
            StretchMode::Default => Stretch::preset_default(channels as u32, sample_rate),
            StretchMode::Voice => Stretch::preset_cheaper(channels as u32, sample_rate),
        }
    }

    /// Change speed and pitch
    pub fn set_playback_rate(&mut self, rate: PlaybackRate) {
        if rate.stretch_mode != self.rate.stretch_mode {
            self.stretcher = Self::make_stretcher(self.channels, self.sample_rate, rate.stretch_mode);
        }
        self.rate = rate;
        self.apply_rate();
    }

    pub fn playback_rate(&self) -> PlaybackRate {
        self.rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether the current rate renders silence
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn apply_rate(&mut self) {
        let mut speed = self.rate.speed;
        let mut pitch = self.rate.pitch;
        self.muted = false;
        if !self.rate.is_valid() {
            log::warn!(
                "set_playback_rate: unsupported speed {} pitch {}, fallback {:?}",
                speed,
                pitch,
                self.rate.fallback
            );
            match self.rate.fallback {
                StretchFallback::Mute => {
                    self.muted = true;
                    speed = 1.0;
                    pitch = 1.0;
                }
                StretchFallback::Default | StretchFallback::Fail => {
                    speed = clamp_or(speed, TIMESTRETCH_SPEED_MIN, TIMESTRETCH_SPEED_MAX, 1.0);
                    pitch = clamp_or(pitch, TIMESTRETCH_PITCH_MIN, TIMESTRETCH_PITCH_MAX, 1.0);
                }
            }
        }
        self.speed = speed;
        self.pitch = pitch;
        self.stretcher
            .set_transpose_factor_semitones(12.0 * pitch.log2(), None);
    }

    fn is_passthrough(&self) -> bool {
        !self.muted
            && (self.speed - 1.0).abs() < TIMESTRETCH_SPEED_MIN_DELTA
            && (self.pitch - 1.0).abs() < TIMESTRETCH_PITCH_MIN_DELTA
    }

    fn frame_size(&self) -> usize {
        self.format.frame_size(self.channels)
    }

    /// Fill `local` with up to `frames` output frames
    fn produce(&mut self, upstream: &mut dyn BufferProvider, frames: usize) -> Option<usize> {
        let frames = frames.min(self.local_frames);
        let fs = self.frame_size();

        if self.is_passthrough() {
            let n = upstream.get_next_buffer(frames)?.min(frames);
            self.local.as_bytes_mut()[..n * fs].copy_from_slice(&upstream.buffer()[..n * fs]);
            upstream.release_buffer(n);
            return Some(n);
        }

        let wanted_in = ((frames as f32 * self.speed).round() as usize).max(1);
        let n_in = upstream.get_next_buffer(wanted_in)?.min(wanted_in);
        let n_out = ((n_in as f32 / self.speed).round() as usize).clamp(1, frames);
        let ch = self.channels;

        if self.muted {
            upstream.release_buffer(n_in);
            self.local.as_bytes_mut()[..n_out * fs].fill(0);
            return Some(n_out);
        }

        let ss = self.format.bytes_per_sample();
        self.in_scratch.clear();
        self.in_scratch.extend(
            upstream.buffer()[..n_in * fs]
                .chunks_exact(ss)
                .map(|b| sample_to_f32(self.format, b)),
        );
        upstream.release_buffer(n_in);

        let out = &mut self.out_scratch[..n_out * ch];
        out.fill(0.0);
        self.stretcher.process(&self.in_scratch, &mut *out);

        match self.format {
            AudioFormat::PcmFloat => {
                self.local.as_f32_mut()[..n_out * ch].copy_from_slice(out);
            }
            _ => {
                for (d, &s) in self.local.as_i16_mut()[..n_out * ch].iter_mut().zip(out.iter()) {
                    *d = clamp16_from_float(s);
                }
            }
        }
        Some(n_out)
    }
}

/// Clamp into range, substituting `fallback` for NaN
fn clamp_or(v: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if v.is_nan() {
        fallback
    } else {
        v.clamp(min, max)
    }
}

impl ProviderStage for TimestretchStage {
    fn get_next_buffer(&mut self, upstream: &mut dyn BufferProvider, frames: usize) -> Option<usize> {
        if self.consumed >= self.produced {
            self.produced = self.produce(upstream, frames)?;
            self.consumed = 0;
        }
        self.served = (self.produced - self.consumed).min(frames);
        Some(self.served)
    }

    fn buffer(&self) -> &[u8] {
        let fs = self.frame_size();
        &self.local.as_bytes()[self.consumed * fs..(self.consumed + self.served) * fs]
    }

    fn release_buffer(&mut self, _upstream: &mut dyn BufferProvider, frames: usize) {
        self.consumed += frames.min(self.served);
        self.served = 0;
        if self.consumed >= self.produced {
            self.produced = 0;
            self.consumed = 0;
        }
    }

    fn teardown(&mut self, _upstream: &mut dyn BufferProvider) {
        // Upstream frames were released when produced
        self.produced = 0;
        self.consumed = 0;
        self.served = 0;
    }

    fn reset(&mut self) {
        self.produced = 0;
        self.consumed = 0;
        self.served = 0;
        self.stretcher.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;

    #[test]
    fn test_unity_rate_passes_through() {
        let samples: Vec<f32> = (0..8).map(|i| i as f32 * 0.1).collect();
        let mut upstream = FakeProvider::from_f32(&samples, 2);
        let mut stage = TimestretchStage::new(2, AudioFormat::PcmFloat, 48_000, PlaybackRate::default(), 16);
        assert_eq!(stage.get_next_buffer(&mut upstream, 4), Some(4));
        let out: Vec<f32> = stage
            .buffer()
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(out, samples);
        stage.release_buffer(&mut upstream, 4);
    }

    #[test]
    fn test_double_speed_consumes_twice_the_input() {
        let mut upstream = FakeProvider::constant_i16(1000, 2, 64);
        let released = upstream.released_frames.clone();
        let mut stage = TimestretchStage::new(2, AudioFormat::Pcm16Bit, 48_000, PlaybackRate::new(2.0, 1.0), 64);
        assert_eq!(stage.get_next_buffer(&mut upstream, 16), Some(16));
        assert_eq!(released.get(), 32);
        stage.release_buffer(&mut upstream, 16);
    }

    #[test]
    fn test_partial_release_reserves_output() {
        let mut upstream = FakeProvider::constant_i16(1000, 1, 64);
        let mut stage = TimestretchStage::new(1, AudioFormat::Pcm16Bit, 48_000, PlaybackRate::new(0.5, 1.0), 64);
        assert_eq!(stage.get_next_buffer(&mut upstream, 8), Some(8));
        stage.release_buffer(&mut upstream, 3);
        assert_eq!(stage.get_next_buffer(&mut upstream, 8), Some(5));
        assert_eq!(stage.buffer().len(), 10);
        stage.release_buffer(&mut upstream, 5);
    }

    #[test]
    fn test_mute_fallback_outputs_silence() {
        let rate = PlaybackRate {
            speed: 50.0,
            fallback: StretchFallback::Mute,
            ..PlaybackRate::default()
        };
        let mut upstream = FakeProvider::constant_i16(1000, 2, 64);
        let mut stage = TimestretchStage::new(2, AudioFormat::Pcm16Bit, 48_000, rate, 64);
        assert!(stage.is_muted());
        let n = stage.get_next_buffer(&mut upstream, 8).expect("input available");
        assert!(stage.buffer()[..n * 4].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_rate_clamps_by_default() {
        let mut stage = TimestretchStage::new(2, AudioFormat::PcmFloat, 48_000, PlaybackRate::default(), 16);
        stage.set_playback_rate(PlaybackRate::new(100.0, 1.0));
        assert!(!stage.is_muted());
        assert_eq!(stage.speed, crate::types::TIMESTRETCH_SPEED_MAX);
    }
}
