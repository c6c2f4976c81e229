//! Linear interpolation resampler
//!
//! Phase is a 32.32 fixed-point position between the two most recent input
//! frames. The phase and both frames persist across calls, so splitting a
//! render into several calls yields the same output as one long call. At a
//! 1:1 ratio the phase never leaves zero and input passes through unchanged.

use super::{OutputMap, Resampler};
use crate::format::{sample_to_f32, AccumMut};
use crate::provider::BufferProvider;
use crate::types::{AudioFormat, MAX_NUM_CHANNELS};

const PHASE_ONE: u64 = 1 << 32;
const PHASE_MASK: u64 = PHASE_ONE - 1;

/// Linear interpolation resampler
pub struct LinearResampler {
    format: AudioFormat,
    map: OutputMap,
    in_rate: u32,
    out_rate: u32,
    /// Input frames advanced per output frame, 32.32
    phase_inc: u64,
    /// Position between `x0` and `x1`, 0.32
    frac: u64,
    /// Input frames still to read before the next output frame
    pending: usize,
    x0: [f32; MAX_NUM_CHANNELS],
    x1: [f32; MAX_NUM_CHANNELS],
    /// Whether `x1` holds a frame read ahead of the phase
    primed: bool,
}

impl LinearResampler {
    pub fn new(format: AudioFormat, in_channels: usize, out_channels: usize, out_rate: u32) -> Self {
        let mut r = Self {
            format,
            map: OutputMap::new(in_channels.clamp(1, MAX_NUM_CHANNELS), out_channels.clamp(1, MAX_NUM_CHANNELS)),
            in_rate: out_rate,
            out_rate,
            phase_inc: PHASE_ONE,
            frac: 0,
            pending: 2,
            x0: [0.0; MAX_NUM_CHANNELS],
            x1: [0.0; MAX_NUM_CHANNELS],
            primed: false,
        };
        r.update_increment();
        r
    }

    fn update_increment(&mut self) {
        self.phase_inc = if self.out_rate == 0 {
            PHASE_ONE
        } else {
            ((self.in_rate as u64) << 32) / self.out_rate as u64
        };
    }
}

/// Input buffer currently acquired from the provider
struct Held {
    frames: usize,
    pos: usize,
}

impl Resampler for LinearResampler {
    fn set_sample_rate(&mut self, in_rate: u32) {
        if in_rate != self.in_rate {
            self.in_rate = in_rate;
            self.update_increment();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.in_rate
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        self.map.gain = [left, right];
    }

    fn resample(
        &mut self,
        mut out: AccumMut<'_>,
        frames: usize,
        provider: &mut dyn BufferProvider,
    ) -> usize {
        let in_ch = self.map.in_channels;
        let ss = self.format.bytes_per_sample();
        let fs = ss * in_ch;
        let mut held = Held { frames: 0, pos: 0 };
        let mut produced = 0;

        'outer: while produced < frames {
            while self.pending > 0 {
                if held.pos == held.frames {
                    if held.frames > 0 {
                        provider.release_buffer(held.frames);
                    }
                    held = Held { frames: 0, pos: 0 };
                    let remaining = (frames - produced) as u64;
                    let want = ((remaining * self.phase_inc) >> 32) as usize + self.pending;
                    match provider.get_next_buffer(want.max(1)) {
                        Some(n) => held.frames = n,
                        None => break 'outer,
                    }
                }
                let start = held.pos * fs;
                let frame = &provider.buffer()[start..start + fs];
                self.x0 = self.x1;
                for (c, sample) in frame.chunks_exact(ss).enumerate() {
                    self.x1[c] = sample_to_f32(self.format, sample);
                }
                held.pos += 1;
                self.pending -= 1;
            }
            self.primed = true;

            let t = (self.frac as f64 / PHASE_ONE as f64) as f32;
            let (x0, x1) = (&self.x0, &self.x1);
            self.map.accumulate(&mut out, produced, |c| x0[c] + (x1[c] - x0[c]) * t);
            produced += 1;

            self.frac += self.phase_inc;
            self.pending = (self.frac >> 32) as usize;
            self.frac &= PHASE_MASK;
        }

        if held.frames > 0 {
            provider.release_buffer(held.pos);
        }
        produced
    }

    fn reset(&mut self) {
        self.frac = 0;
        self.pending = 2;
        self.x0 = [0.0; MAX_NUM_CHANNELS];
        self.x1 = [0.0; MAX_NUM_CHANNELS];
        self.primed = false;
    }

    fn unreleased_frames(&self) -> usize {
        usize::from(self.primed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;

    fn ramp_input(frames: usize) -> Vec<i16> {
        (0..frames as i16).map(|i| i * 100).collect()
    }

    #[test]
    fn test_unity_ratio_passes_through() {
        let mut r = LinearResampler::new(AudioFormat::Pcm16Bit, 1, 2, 48_000);
        r.set_sample_rate(48_000);
        let mut provider = FakeProvider::from_i16(&ramp_input(9), 1);
        let mut acc = vec![0i32; 16];
        let n = r.resample(AccumMut::Fixed(&mut acc), 8, &mut provider);
        assert_eq!(n, 8);
        for i in 0..8 {
            assert_eq!(acc[2 * i], (i as i32 * 100) << 12);
            assert_eq!(acc[2 * i + 1], (i as i32 * 100) << 12);
        }
    }

    #[test]
    fn test_upsampling_interpolates() {
        let mut r = LinearResampler::new(AudioFormat::PcmFloat, 1, 2, 48_000);
        r.set_sample_rate(24_000);
        let input: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let mut provider = FakeProvider::from_f32(&input, 1);
        let mut acc = vec![0.0f32; 8];
        let n = r.resample(AccumMut::Float(&mut acc), 4, &mut provider);
        assert_eq!(n, 4);
        let left: Vec<f32> = acc.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_phase_continuity_across_calls() {
        let input: Vec<i16> = (0..400).map(|i| ((i * 37) % 2000) as i16 - 1000).collect();

        let mut whole = LinearResampler::new(AudioFormat::Pcm16Bit, 1, 2, 48_000);
        whole.set_sample_rate(44_100);
        let mut provider = FakeProvider::from_i16(&input, 1);
        let mut expected = vec![0i32; 2 * 256];
        assert_eq!(whole.resample(AccumMut::Fixed(&mut expected), 256, &mut provider), 256);

        let mut split = LinearResampler::new(AudioFormat::Pcm16Bit, 1, 2, 48_000);
        split.set_sample_rate(44_100);
        let mut provider = FakeProvider::from_i16(&input, 1).with_chunk(7);
        let mut actual = vec![0i32; 2 * 256];
        for call in 0..8 {
            let out = &mut actual[call * 64..(call + 1) * 64];
            assert_eq!(split.resample(AccumMut::Fixed(out), 32, &mut provider), 32);
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_stops_when_provider_runs_dry() {
        let mut r = LinearResampler::new(AudioFormat::Pcm16Bit, 2, 2, 48_000);
        r.set_sample_rate(48_000);
        let mut provider = FakeProvider::constant_i16(100, 2, 4);
        let releases = provider.released_frames.clone();
        let mut acc = vec![0i32; 32];
        // Four input frames give three outputs (one frame of look-ahead)
        assert_eq!(r.resample(AccumMut::Fixed(&mut acc), 16, &mut provider), 3);
        assert_eq!(releases.get(), 4);
        assert_eq!(r.unreleased_frames(), 1);
    }

    #[test]
    fn test_gain_and_reset() {
        let mut r = LinearResampler::new(AudioFormat::PcmFloat, 2, 2, 48_000);
        r.set_sample_rate(48_000);
        r.set_volume(0.5, 0.25);
        let mut provider = FakeProvider::from_f32(&[1.0; 8], 2);
        let mut acc = vec![0.0f32; 4];
        r.resample(AccumMut::Float(&mut acc), 2, &mut provider);
        assert_eq!(acc, vec![0.5, 0.25, 0.5, 0.25]);
        r.reset();
        assert_eq!(r.unreleased_frames(), 0);
    }
}
