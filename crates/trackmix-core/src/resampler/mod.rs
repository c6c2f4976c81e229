//! Sample-rate conversion
//!
//! A resampler pulls input frames from a track's provider chain and
//! accumulates converted frames, scaled by a per-call stereo gain, into the
//! mixer accumulator. Input has either one channel or as many as the mixer;
//! mono input is duplicated into every output channel.
//!
//! ## Quality tiers
//!
//! | Tier   | Implementation                          |
//! |--------|-----------------------------------------|
//! | Low    | [`LinearResampler`]                     |
//! | Medium | rubato cubic polynomial                 |
//! | High   | rubato windowed sinc, long filter       |
//! | DynLow | rubato windowed sinc, short filter      |

mod linear;
mod sinc;

pub use linear::LinearResampler;
pub use sinc::SincResampler;

use serde::{Deserialize, Serialize};

use crate::format::{clampq4_27_from_float, AccumMut};
use crate::provider::BufferProvider;
use crate::types::AudioFormat;

/// Resampler quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplerQuality {
    /// Linear interpolation
    Low,
    /// Polynomial interpolation
    Medium,
    /// Long windowed-sinc filter
    High,
    /// Short windowed-sinc filter for non-music rates
    DynLow,
}

/// Sample rates typical of music content
const MUSIC_RATES: [u32; 9] = [
    22_050, 24_000, 32_000, 44_100, 48_000, 88_200, 96_000, 176_400, 192_000,
];

/// Whether `rate` is a music-typical rate (those get the default tier)
pub fn is_music_rate(rate: u32) -> bool {
    MUSIC_RATES.contains(&rate)
}

/// Sample-rate converter owned by one track
pub trait Resampler {
    /// Set the input rate (the output rate is fixed at creation)
    fn set_sample_rate(&mut self, in_rate: u32);

    fn sample_rate(&self) -> u32;

    /// Gain applied to every frame of the next `resample` calls
    fn set_volume(&mut self, left: f32, right: f32);

    /// Accumulate up to `frames` output frames into `out`
    ///
    /// Pulls from `provider` as needed and returns the frames produced, which
    /// is less than `frames` only when the provider ran dry.
    fn resample(&mut self, out: AccumMut<'_>, frames: usize, provider: &mut dyn BufferProvider)
        -> usize;

    /// Drop filter history and phase
    fn reset(&mut self);

    /// Input frames consumed from the provider but not yet turned into output
    fn unreleased_frames(&self) -> usize;
}

/// Builds resamplers for tracks
pub trait ResamplerFactory {
    fn create(
        &self,
        format: AudioFormat,
        in_channels: usize,
        out_channels: usize,
        out_rate: u32,
        quality: ResamplerQuality,
    ) -> Box<dyn Resampler>;
}

/// Factory mapping quality tiers to the built-in resamplers
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResamplerFactory;

impl ResamplerFactory for DefaultResamplerFactory {
    fn create(
        &self,
        format: AudioFormat,
        in_channels: usize,
        out_channels: usize,
        out_rate: u32,
        quality: ResamplerQuality,
    ) -> Box<dyn Resampler> {
        match quality {
            ResamplerQuality::Low => Box::new(LinearResampler::new(
                format,
                in_channels,
                out_channels,
                out_rate,
            )),
            _ => match SincResampler::new(format, in_channels, out_channels, out_rate, quality) {
                Ok(r) => Box::new(r),
                Err(e) => {
                    log::warn!("create: {:?} resampler unavailable ({}), using linear", quality, e);
                    Box::new(LinearResampler::new(format, in_channels, out_channels, out_rate))
                }
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Channel routing and gain for one output frame
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputMap {
    pub in_channels: usize,
    pub out_channels: usize,
    pub gain: [f32; 2],
}

impl OutputMap {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            gain: [1.0, 1.0],
        }
    }

    /// Input channel feeding output channel `c`
    #[inline]
    pub fn source(&self, c: usize) -> usize {
        if self.in_channels == 1 {
            0
        } else {
            c
        }
    }

    /// Gain of output channel `c`; multichannel output follows the left gain
    #[inline]
    pub fn gain(&self, c: usize) -> f32 {
        if self.out_channels == 2 {
            self.gain[c]
        } else {
            self.gain[0]
        }
    }

    /// Accumulate one output frame, `sample(ch)` giving input channel values
    #[inline]
    pub fn accumulate(&self, out: &mut AccumMut<'_>, frame: usize, sample: impl Fn(usize) -> f32) {
        let base = frame * self.out_channels;
        match out {
            AccumMut::Fixed(acc) => {
                for c in 0..self.out_channels {
                    let v = clampq4_27_from_float(sample(self.source(c)) * self.gain(c));
                    acc[base + c] = acc[base + c].wrapping_add(v);
                }
            }
            AccumMut::Float(acc) => {
                for c in 0..self.out_channels {
                    acc[base + c] += sample(self.source(c)) * self.gain(c);
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_music_rates() {
        assert!(is_music_rate(44_100));
        assert!(is_music_rate(48_000));
        assert!(!is_music_rate(8_000));
        assert!(!is_music_rate(16_000));
        assert!(!is_music_rate(44_000));
    }

    #[test]
    fn test_output_map_routing() {
        let map = OutputMap {
            gain: [0.5, 0.25],
            ..OutputMap::new(1, 2)
        };
        let mut acc = vec![0.0f32; 4];
        let mut out = AccumMut::Float(&mut acc);
        map.accumulate(&mut out, 1, |_| 1.0);
        assert_eq!(acc, vec![0.0, 0.0, 0.5, 0.25]);

        let map = OutputMap {
            gain: [0.5, 0.25],
            ..OutputMap::new(4, 4)
        };
        let mut acc = vec![0i32; 4];
        let mut out = AccumMut::Fixed(&mut acc);
        map.accumulate(&mut out, 0, |c| c as f32 * 0.25);
        assert_eq!(acc, vec![0, 1 << 24, 2 << 24, 3 << 24]);
    }

    #[test]
    fn test_default_factory_tiers() {
        let factory = DefaultResamplerFactory;
        for quality in [
            ResamplerQuality::Low,
            ResamplerQuality::Medium,
            ResamplerQuality::High,
            ResamplerQuality::DynLow,
        ] {
            let mut r = factory.create(AudioFormat::PcmFloat, 2, 2, 48_000, quality);
            r.set_sample_rate(44_100);
            assert_eq!(r.sample_rate(), 44_100);
            assert_eq!(r.unreleased_frames(), 0);
        }
    }
}
