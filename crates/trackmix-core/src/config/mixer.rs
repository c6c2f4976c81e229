//! Mixer-wide configuration

use serde::{Deserialize, Serialize};

use std::path::Path;

use super::io::load_config;
use crate::error::{MixerError, MixerResult};
use crate::resampler::ResamplerQuality;
use crate::types::{
    AudioFormat, BLOCK_FRAMES, COPY_BUFFER_FRAMES, DEFAULT_FRAME_COUNT, DEFAULT_SAMPLE_RATE,
    MAX_NUM_TRACKS,
};

/// Mixer configuration
///
/// Fixed for the lifetime of a [`Mixer`](crate::engine::Mixer): the frame count
/// sizes every scratch and output buffer, and the device rate decides which
/// tracks need a resampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Output frames produced by each `process()` call
    /// Default: 256
    pub frame_count: usize,

    /// Device output sample rate in Hz
    /// Default: 48000
    pub sample_rate: u32,

    /// Number of track slots (at most 32)
    /// Default: 32
    pub max_tracks: usize,

    /// Mix in float instead of Q4.27 fixed point
    /// When false, tracks are converted to 16-bit PCM before mixing.
    /// Default: true
    pub float_mixer: bool,

    /// Block size of the generic no-resample strategy
    /// Default: 16
    pub block_frames: usize,

    /// Local buffer size of copying adapters (reformat, downmix, remix, timestretch)
    /// Default: 256
    pub copy_buffer_frames: usize,

    /// Whether the multichannel downmix effect is available
    /// When false, every channel conversion goes through the remixer.
    /// Default: true
    pub downmix_effect: bool,

    /// Quality used for music-typical track rates
    /// Default: unset (high quality)
    pub resampler_quality: Option<ResamplerQuality>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_tracks: MAX_NUM_TRACKS,
            float_mixer: true,
            block_frames: BLOCK_FRAMES,
            copy_buffer_frames: COPY_BUFFER_FRAMES,
            downmix_effect: true,
            resampler_quality: None,
        }
    }
}

impl MixerConfig {
    /// Configuration with the given frame count and device rate, defaults elsewhere
    pub fn new(frame_count: usize, sample_rate: u32) -> Self {
        Self {
            frame_count,
            sample_rate,
            ..Self::default()
        }
    }

    /// Load from YAML, falling back to defaults when the file is unusable
    ///
    /// A file that parses but fails [`Self::validate`] is treated like a
    /// malformed one.
    pub fn load(path: &Path) -> Self {
        let config: Self = load_config(path);
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                log::warn!("MixerConfig::load: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> MixerResult<()> {
        if self.frame_count == 0 {
            return Err(MixerError::InvalidFrameCount(self.frame_count));
        }
        if self.block_frames == 0 || self.copy_buffer_frames == 0 {
            return Err(MixerError::InvalidFrameCount(0));
        }
        if self.sample_rate == 0 {
            return Err(MixerError::InvalidSampleRate(self.sample_rate));
        }
        if self.max_tracks == 0 || self.max_tracks > MAX_NUM_TRACKS {
            return Err(MixerError::NoFreeTracks {
                max: self.max_tracks,
            });
        }
        Ok(())
    }

    /// Internal format tracks are converted to before mixing
    pub fn mixer_in_format(&self) -> AudioFormat {
        if self.float_mixer {
            AudioFormat::PcmFloat
        } else {
            AudioFormat::Pcm16Bit
        }
    }

    /// Quality tier for the default (music-rate) case
    pub fn default_quality(&self) -> ResamplerQuality {
        self.resampler_quality.unwrap_or(ResamplerQuality::High)
    }
}
