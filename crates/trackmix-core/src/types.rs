//! Core types shared across the mixer
//!
//! Sample formats, channel masks, playback rate descriptors and the mixer-wide
//! constants (track pool size, channel limits, unity gains).

use serde::{Deserialize, Serialize};
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of tracks one mixer can hold (one bit per track in the pool mask)
pub const MAX_NUM_TRACKS: usize = 32;

/// Maximum number of channels in a mixer output buffer
pub const MAX_NUM_CHANNELS: usize = 8;

/// Maximum track channel count the downmix/remix stage accepts
pub const MAX_NUM_CHANNELS_TO_DOWNMIX: usize = 8;

/// Number of independently controlled main volumes (left/right)
pub const MAX_NUM_VOLUMES: usize = 2;

/// Unity gain in the integer volume domain (U4.12)
pub const UNITY_GAIN_INT: i32 = 0x1000;

/// Unity gain in the float volume domain
pub const UNITY_GAIN_FLOAT: f32 = 1.0;

/// Default device sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Default number of output frames per `process()` call
pub const DEFAULT_FRAME_COUNT: usize = 256;

/// Block size (in frames) for the generic no-resample strategy
pub const BLOCK_FRAMES: usize = 16;

/// Local buffer size (in frames) of copying adapters
pub const COPY_BUFFER_FRAMES: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Sample formats
// ─────────────────────────────────────────────────────────────────────────────

/// Sample format of a PCM stream
///
/// Linear PCM formats can be mixed; compressed formats are only listed so that
/// callers handing the mixer an encoded stream get a proper error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Unsigned 8-bit, offset binary
    Pcm8Bit,
    /// Signed 16-bit (Q0.15)
    Pcm16Bit,
    /// Signed 24-bit, packed in 3 bytes
    Pcm24BitPacked,
    /// Signed 32-bit (Q0.31)
    Pcm32Bit,
    /// Signed 24-bit in the low bits of a 32-bit word (Q8.23)
    Pcm8_24Bit,
    /// 32-bit float, nominal range [-1.0, 1.0]
    PcmFloat,
    /// MPEG layer III elementary stream
    Mp3,
    /// AAC elementary stream
    Aac,
}

impl AudioFormat {
    /// Whether this is a linear PCM format the reformat stage understands
    pub fn is_linear_pcm(self) -> bool {
        !matches!(self, Self::Mp3 | Self::Aac)
    }

    /// Whether a track may be created with this format
    pub fn is_valid_track_format(self) -> bool {
        matches!(
            self,
            Self::Pcm8Bit | Self::Pcm16Bit | Self::Pcm24BitPacked | Self::Pcm32Bit | Self::PcmFloat
        )
    }

    /// Whether the mixer can write this format to an output buffer
    pub fn is_valid_mixer_format(self) -> bool {
        matches!(self, Self::Pcm16Bit | Self::PcmFloat)
    }

    /// Size of one sample in bytes (0 for compressed formats)
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm8Bit => 1,
            Self::Pcm16Bit => 2,
            Self::Pcm24BitPacked => 3,
            Self::Pcm32Bit | Self::Pcm8_24Bit | Self::PcmFloat => 4,
            Self::Mp3 | Self::Aac => 0,
        }
    }

    /// Size of one frame of `channels` samples in bytes
    pub fn frame_size(self, channels: usize) -> usize {
        self.bytes_per_sample() * channels
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel masks
// ─────────────────────────────────────────────────────────────────────────────

/// Speaker position bits for positional channel masks
pub mod position {
    pub const FRONT_LEFT: u32 = 0x1;
    pub const FRONT_RIGHT: u32 = 0x2;
    pub const FRONT_CENTER: u32 = 0x4;
    pub const LOW_FREQUENCY: u32 = 0x8;
    pub const BACK_LEFT: u32 = 0x10;
    pub const BACK_RIGHT: u32 = 0x20;
    pub const FRONT_LEFT_OF_CENTER: u32 = 0x40;
    pub const FRONT_RIGHT_OF_CENTER: u32 = 0x80;
    pub const BACK_CENTER: u32 = 0x100;
    pub const SIDE_LEFT: u32 = 0x200;
    pub const SIDE_RIGHT: u32 = 0x400;
    pub const TOP_CENTER: u32 = 0x800;
    pub const TOP_FRONT_LEFT: u32 = 0x1000;
    pub const TOP_FRONT_CENTER: u32 = 0x2000;
    pub const TOP_FRONT_RIGHT: u32 = 0x4000;
    pub const TOP_BACK_LEFT: u32 = 0x8000;
    pub const TOP_BACK_CENTER: u32 = 0x10000;
    pub const TOP_BACK_RIGHT: u32 = 0x20000;
}

/// Channel layout of a stream
///
/// `Position` masks carry one bit per speaker position (see [`position`]);
/// `Index` masks carry one bit per raw channel index and have no spatial meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMask {
    Position(u32),
    Index(u32),
}

impl ChannelMask {
    pub const MONO: Self = Self::Position(position::FRONT_LEFT);
    pub const STEREO: Self = Self::Position(position::FRONT_LEFT | position::FRONT_RIGHT);
    pub const QUAD: Self = Self::Position(
        position::FRONT_LEFT | position::FRONT_RIGHT | position::BACK_LEFT | position::BACK_RIGHT,
    );
    pub const SURROUND_5_1: Self = Self::Position(
        position::FRONT_LEFT
            | position::FRONT_RIGHT
            | position::FRONT_CENTER
            | position::LOW_FREQUENCY
            | position::BACK_LEFT
            | position::BACK_RIGHT,
    );
    pub const SURROUND_7_1: Self = Self::Position(
        position::FRONT_LEFT
            | position::FRONT_RIGHT
            | position::FRONT_CENTER
            | position::LOW_FREQUENCY
            | position::BACK_LEFT
            | position::BACK_RIGHT
            | position::SIDE_LEFT
            | position::SIDE_RIGHT,
    );

    /// Index mask with the first `count` channels set
    pub fn index_of_count(count: usize) -> Self {
        Self::Index(if count >= 32 { u32::MAX } else { (1u32 << count) - 1 })
    }

    /// Raw mask bits
    pub fn bits(self) -> u32 {
        match self {
            Self::Position(bits) | Self::Index(bits) => bits,
        }
    }

    /// Number of channels described by the mask
    pub fn count(self) -> usize {
        self.bits().count_ones() as usize
    }

    pub fn is_positional(self) -> bool {
        matches!(self, Self::Position(_))
    }

    /// Whether the mask describes 1..=[`MAX_NUM_CHANNELS`] channels
    pub fn is_valid(self) -> bool {
        (1..=MAX_NUM_CHANNELS).contains(&self.count())
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(bits) => write!(f, "position({:#x})", bits),
            Self::Index(bits) => write!(f, "index({:#x})", bits),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback rate
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum time-stretch speed
pub const TIMESTRETCH_SPEED_MIN: f32 = 0.01;
/// Maximum time-stretch speed
pub const TIMESTRETCH_SPEED_MAX: f32 = 20.0;
/// Minimum pitch factor
pub const TIMESTRETCH_PITCH_MIN: f32 = 0.25;
/// Maximum pitch factor
pub const TIMESTRETCH_PITCH_MAX: f32 = 4.0;
/// Speed changes smaller than this are ignored
pub const TIMESTRETCH_SPEED_MIN_DELTA: f32 = 0.0001;
/// Pitch changes smaller than this are ignored
pub const TIMESTRETCH_PITCH_MIN_DELTA: f32 = 0.0001;

/// How the stretcher trades quality for intelligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchMode {
    #[default]
    Default,
    Voice,
}

/// What the stretcher does with a rate it cannot honor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchFallback {
    /// Clamp speed and pitch into the supported range
    #[default]
    Default,
    /// Output silence
    Mute,
    /// Refuse the rate; treated as clamping at this layer
    Fail,
}

/// Speed/pitch descriptor for a track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackRate {
    /// Playback speed (1.0 = normal)
    pub speed: f32,
    /// Pitch factor (1.0 = unchanged)
    pub pitch: f32,
    pub stretch_mode: StretchMode,
    pub fallback: StretchFallback,
}

impl Default for PlaybackRate {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            stretch_mode: StretchMode::Default,
            fallback: StretchFallback::Default,
        }
    }
}

impl PlaybackRate {
    /// Create a rate with default stretch and fallback modes
    pub fn new(speed: f32, pitch: f32) -> Self {
        Self {
            speed,
            pitch,
            ..Self::default()
        }
    }

    /// Whether speed and pitch are inside the supported range
    pub fn is_valid(&self) -> bool {
        (TIMESTRETCH_SPEED_MIN..=TIMESTRETCH_SPEED_MAX).contains(&self.speed)
            && (TIMESTRETCH_PITCH_MIN..=TIMESTRETCH_PITCH_MAX).contains(&self.pitch)
    }

    /// Speed and pitch both within the minimum deltas of `other`
    pub fn is_close_to(&self, other: &PlaybackRate) -> bool {
        (self.speed - other.speed).abs() < TIMESTRETCH_SPEED_MIN_DELTA
            && (self.pitch - other.pitch).abs() < TIMESTRETCH_PITCH_MIN_DELTA
    }

    /// Equal within tolerance, including modes
    pub fn is_equal(&self, other: &PlaybackRate) -> bool {
        self.is_close_to(other)
            && self.stretch_mode == other.stretch_mode
            && self.fallback == other.fallback
    }

    /// Whether this rate leaves audio untouched
    pub fn is_unity(&self) -> bool {
        self.is_close_to(&PlaybackRate::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Handle of a track slot (stable while the track exists)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackName(pub usize);

impl TrackName {
    /// Create a track name (panics if >= MAX_NUM_TRACKS)
    pub fn new(index: usize) -> Self {
        assert!(index < MAX_NUM_TRACKS, "Track index must be less than {}", MAX_NUM_TRACKS);
        Self(index)
    }

    /// Bit of this track in the pool masks
    #[inline]
    pub fn mask(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for TrackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mask_counts() {
        assert_eq!(ChannelMask::MONO.count(), 1);
        assert_eq!(ChannelMask::STEREO.count(), 2);
        assert_eq!(ChannelMask::QUAD.count(), 4);
        assert_eq!(ChannelMask::SURROUND_5_1.count(), 6);
        assert_eq!(ChannelMask::SURROUND_7_1.count(), 8);
        assert_eq!(ChannelMask::index_of_count(3), ChannelMask::Index(0b111));
    }

    #[test]
    fn test_channel_mask_validity() {
        assert!(ChannelMask::STEREO.is_valid());
        assert!(!ChannelMask::Position(0).is_valid());
        assert!(!ChannelMask::Index(0x1ff).is_valid()); // 9 channels
        assert!(ChannelMask::Index(0xff).is_valid());
    }

    #[test]
    fn test_format_classification() {
        assert!(AudioFormat::Pcm8_24Bit.is_linear_pcm());
        assert!(!AudioFormat::Pcm8_24Bit.is_valid_track_format());
        assert!(!AudioFormat::Mp3.is_linear_pcm());
        assert!(AudioFormat::PcmFloat.is_valid_mixer_format());
        assert!(!AudioFormat::Pcm32Bit.is_valid_mixer_format());
        assert_eq!(AudioFormat::Pcm24BitPacked.frame_size(2), 6);
    }

    #[test]
    fn test_playback_rate_tolerance() {
        let base = PlaybackRate::default();
        assert!(base.is_unity());
        assert!(base.is_equal(&PlaybackRate::new(1.00005, 1.0)));
        assert!(!base.is_equal(&PlaybackRate::new(1.01, 1.0)));

        let mut voice = base;
        voice.stretch_mode = StretchMode::Voice;
        assert!(base.is_close_to(&voice));
        assert!(!base.is_equal(&voice));

        assert!(!PlaybackRate::new(30.0, 1.0).is_valid());
        assert!(!PlaybackRate::new(1.0, 0.1).is_valid());
    }

    #[test]
    fn test_track_name_mask() {
        assert_eq!(TrackName::new(0).mask(), 1);
        assert_eq!(TrackName::new(5).mask(), 0x20);
    }

    #[test]
    #[should_panic]
    fn test_track_name_out_of_range() {
        TrackName::new(MAX_NUM_TRACKS);
    }
}
