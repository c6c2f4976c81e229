//! Mixer error types

use thiserror::Error;

use crate::types::{AudioFormat, ChannelMask, TrackName};

/// Configuration-time errors
///
/// Mixing itself never fails: `process()` recovers locally from exhausted or
/// misaligned input. These errors are returned by track creation and parameter
/// setting, and a failed call leaves the mixer untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixerError {
    /// Channel mask with zero or too many channels
    #[error("Invalid channel mask: {0}")]
    InvalidChannelMask(ChannelMask),

    /// Format that cannot feed a track
    #[error("Invalid track format: {0:?}")]
    InvalidFormat(AudioFormat),

    /// Output format other than 16-bit PCM or float
    #[error("Invalid mixer output format: {0:?}")]
    InvalidMixerFormat(AudioFormat),

    /// Every track slot is in use
    #[error("No free track slot (max {max})")]
    NoFreeTracks { max: usize },

    /// Name does not refer to an allocated track
    #[error("Unknown track: {0}")]
    InvalidTrackName(TrackName),

    /// Parameter not recognized for the given target
    #[error("Bad parameter {param} for target {target}")]
    BadParameter {
        target: &'static str,
        param: &'static str,
    },

    /// Zero sample rate
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    /// Buffer handle not created by this mixer
    #[error("Unknown buffer handle: {0}")]
    UnknownBuffer(usize),

    /// Zero frames per process call
    #[error("Invalid frame count: {0}")]
    InvalidFrameCount(usize),
}

/// Result type for mixer configuration
pub type MixerResult<T> = Result<T, MixerError>;
