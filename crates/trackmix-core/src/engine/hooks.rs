//! Hook selection
//!
//! After any parameter change the mixer re-derives, per enabled track, what
//! processing it needs ([`Needs`]) and which kernel runs it ([`TrackHook`]),
//! then picks one whole-buffer strategy ([`ProcessHook`]). The selected
//! strategy runs once; afterwards [`settle`] reclassifies tracks whose ramps
//! just finished at zero gain as muted for the following calls.
//!
//! ## Strategies
//!
//! | Hook                  | Chosen when                                        |
//! |-----------------------|----------------------------------------------------|
//! | `Nop`                 | no active track, or every active track muted       |
//! | `GenericResampling`   | any active track resamples                         |
//! | `GenericNoResampling` | otherwise                                          |
//! | `NoResampleOneTrack`  | one plain track: unmuted, no ramp, no aux, not mono |

use crate::types::{AudioFormat, MAX_NUM_CHANNELS};

/// Channel-count class of a track's input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelClass {
    Mono,
    #[default]
    Stereo,
    Multi,
}

impl ChannelClass {
    pub fn of(channels: usize) -> Self {
        match channels {
            0 | 1 => Self::Mono,
            2 => Self::Stereo,
            _ => Self::Multi,
        }
    }
}

/// What processing a track currently requires
///
/// Derived on every validate pass; never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Needs {
    pub channels: ChannelClass,
    pub resample: bool,
    pub aux: bool,
    pub mute: bool,
}

/// Inputs to needs derivation, read off one track
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrackSummary {
    /// Channel count of the track's native layout
    pub channel_count: usize,
    pub resample: bool,
    /// Aux level set (or ramping) and an aux buffer attached
    pub aux: bool,
    /// Any main or aux ramp in flight
    pub ramping: bool,
    /// Both integer main targets are zero
    pub silent: bool,
    /// Mono track into a stereo mixer layout, duplicated by the kernel
    pub mono_expand: bool,
    pub mixer_channel_count: usize,
    pub mixer_in_format: AudioFormat,
}

impl Default for TrackSummary {
    fn default() -> Self {
        Self {
            channel_count: 0,
            resample: false,
            aux: false,
            ramping: false,
            silent: false,
            mono_expand: false,
            mixer_channel_count: 0,
            mixer_in_format: AudioFormat::PcmFloat,
        }
    }
}

impl Needs {
    pub(crate) fn derive(t: &TrackSummary) -> Self {
        Self {
            channels: ChannelClass::of(t.channel_count),
            resample: t.resample,
            aux: t.aux,
            mute: is_mute(t),
        }
    }
}

/// Silent, steady, not resampling and not feeding an aux bus
pub(crate) fn is_mute(t: &TrackSummary) -> bool {
    t.silent && !t.ramping && !t.resample && !t.aux
}

/// Kernel family of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    /// Resampler pulls from the chain
    Resample,
    /// One input channel per output channel
    NoResample,
    /// One input channel duplicated into a stereo output
    NoResampleMono,
}

/// Per-track kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackHook {
    /// Contributes nothing; the provider is not pulled
    #[default]
    Nop,
    Mix {
        kind: TrackType,
        /// Output channels per frame
        channels: usize,
        /// Mixer-internal input format
        format: AudioFormat,
    },
}

impl TrackHook {
    /// Kernel for `kind`, or `None` when no kernel covers the combination
    pub fn get(kind: TrackType, channels: usize, format: AudioFormat) -> Option<Self> {
        let channels_ok = match kind {
            TrackType::NoResampleMono => channels == 2,
            _ => (1..=MAX_NUM_CHANNELS).contains(&channels),
        };
        let format_ok = matches!(format, AudioFormat::Pcm16Bit | AudioFormat::PcmFloat);
        if !channels_ok || !format_ok {
            log::error!(
                "get_track_hook: no kernel for {:?}, {} channels, {:?}",
                kind,
                channels,
                format
            );
            return None;
        }
        Some(Self::Mix {
            kind,
            channels,
            format,
        })
    }

    /// Hook for a track with the given needs
    pub(crate) fn select(needs: &Needs, t: &TrackSummary) -> Self {
        if needs.mute {
            return Self::Nop;
        }
        let kind = if needs.resample {
            TrackType::Resample
        } else if needs.channels == ChannelClass::Mono && t.mono_expand {
            TrackType::NoResampleMono
        } else {
            TrackType::NoResample
        };
        Self::get(kind, t.mixer_channel_count, t.mixer_in_format).unwrap_or(Self::Nop)
    }
}

/// Whole-buffer processing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessHook {
    /// Zero destinations and drain providers
    #[default]
    Nop,
    GenericNoResampling,
    GenericResampling,
    /// Single track written straight to its destination
    NoResampleOneTrack,
}

impl ProcessHook {
    /// Whether the single-track path has a kernel for this combination
    pub fn one_track_supported(channels: usize, in_format: AudioFormat, out_format: AudioFormat) -> bool {
        (1..=MAX_NUM_CHANNELS).contains(&channels)
            && matches!(in_format, AudioFormat::Pcm16Bit | AudioFormat::PcmFloat)
            && out_format.is_valid_mixer_format()
    }
}

/// Running totals of a validate pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Validation {
    pub active: usize,
    /// No track so far rules out the single-track path
    pub plain: bool,
    pub resampling: bool,
    pub volume_ramp: bool,
}

impl Default for Validation {
    fn default() -> Self {
        Self {
            active: 0,
            plain: true,
            resampling: false,
            volume_ramp: false,
        }
    }
}

impl Validation {
    /// Fold one enabled track into the totals
    pub fn add(&mut self, needs: &Needs, ramping: bool) {
        self.active += 1;
        if ramping {
            self.volume_ramp = true;
        }
        if needs.mute {
            return;
        }
        if needs.aux || needs.resample || needs.channels == ChannelClass::Mono {
            self.plain = false;
        }
        if needs.resample {
            self.resampling = true;
        }
    }

    /// Strategy for the call that follows validation
    ///
    /// `single` describes the only active track when there is exactly one:
    /// whether it is muted and whether the single-track path supports it.
    pub fn select(&self, single: Option<(bool, bool)>) -> ProcessHook {
        if self.active == 0 {
            return ProcessHook::Nop;
        }
        if self.resampling {
            return ProcessHook::GenericResampling;
        }
        if self.plain && !self.volume_ramp {
            if let Some((false, true)) = single {
                return ProcessHook::NoResampleOneTrack;
            }
        }
        ProcessHook::GenericNoResampling
    }
}

/// Steady-state strategy once the validate-triggered call has run
///
/// `all_muted` is true when every active track now classifies as muted;
/// `single` is as for [`Validation::select`], re-read after the call.
pub(crate) fn settle(
    current: ProcessHook,
    validation: &Validation,
    all_muted: bool,
    single: Option<(bool, bool)>,
) -> ProcessHook {
    if validation.active == 0 {
        return current;
    }
    if all_muted {
        return ProcessHook::Nop;
    }
    if validation.plain && !validation.resampling {
        if let Some((false, true)) = single {
            return ProcessHook::NoResampleOneTrack;
        }
    }
    current
}
