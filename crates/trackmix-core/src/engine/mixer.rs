//! The mixer
//!
//! Owns a fixed pool of tracks addressed by [`TrackName`], the main and aux
//! buffers they mix into, and the scratch accumulators.
//!
//! # Processing
//!
//! Parameter changes only mark tracks dirty. The next [`Mixer::process`]
//! call re-derives every active track's needs and kernel, picks a strategy,
//! runs it once, and then settles: tracks whose ramps just ended at zero gain
//! become muted and stop being pulled. Calls without intervening changes rerun
//! the settled strategy directly.
//!
//! Tracks sharing a main buffer form a group: the group is accumulated
//! together and converted to the output format once.
//!
//! # Usage
//!
//! ```ignore
//! let mut mixer = Mixer::new(MixerConfig::new(256, 48_000))?;
//! let out = mixer.create_main_buffer();
//! let name = mixer.get_track_name(ChannelMask::STEREO, AudioFormat::Pcm16Bit, 0)?;
//! mixer.set_parameter(name, Target::Track, Param::MainBuffer(Some(out)))?;
//! mixer.set_buffer_provider(name, Some(Box::new(source)))?;
//! mixer.enable(name)?;
//! mixer.process();
//! let pcm = mixer.main_buffer_i16(out)?;
//! ```

use super::hooks::{is_mute, settle, Needs, ProcessHook, TrackHook, Validation};
use super::track::Track;
use crate::buffer::{AlignedBuf, AuxBufferId, BufferId};
use crate::config::MixerConfig;
use crate::error::{MixerError, MixerResult};
use crate::format::{convert_mixer_format, AccumMut, AccumRef, OutputMut};
use crate::provider::BufferProvider;
use crate::resampler::{DefaultResamplerFactory, ResamplerFactory};
use crate::types::{AudioFormat, ChannelMask, PlaybackRate, TrackName, MAX_NUM_CHANNELS, MAX_NUM_VOLUMES};
use crate::volume::VolumeState;

/// Group of parameters addressed by [`Mixer::set_parameter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Layout, formats and buffers
    Track,
    /// Sample rate conversion
    Resample,
    /// Gains applied immediately
    Volume,
    /// Gains ramped over one `process()` call
    RampVolume,
    /// Speed and pitch
    Timestretch,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Resample => "resample",
            Self::Volume => "volume",
            Self::RampVolume => "ramp_volume",
            Self::Timestretch => "timestretch",
        }
    }
}

/// Parameter and value
///
/// Valid pairs:
///
/// | Target                   | Parameters                                                        |
/// |--------------------------|-------------------------------------------------------------------|
/// | `Track`                  | `ChannelMask`, `MainBuffer`, `AuxBuffer`, `Format`, `MixerFormat`, `MixerChannelMask` |
/// | `Resample`               | `SampleRate`, `Reset`, `Remove`                                   |
/// | `Volume`, `RampVolume`   | `Volume`, `AuxLevel`                                              |
/// | `Timestretch`            | `PlaybackRate`                                                    |
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    ChannelMask(ChannelMask),
    MainBuffer(Option<BufferId>),
    AuxBuffer(Option<AuxBufferId>),
    Format(AudioFormat),
    MixerFormat(AudioFormat),
    MixerChannelMask(ChannelMask),
    /// Native rate of the track
    SampleRate(u32),
    Reset,
    Remove,
    /// Main gain of one volume channel (0 = left, 1 = right)
    Volume(usize, f32),
    AuxLevel(f32),
    PlaybackRate(PlaybackRate),
}

impl Param {
    pub fn name(self) -> &'static str {
        match self {
            Self::ChannelMask(_) => "channel_mask",
            Self::MainBuffer(_) => "main_buffer",
            Self::AuxBuffer(_) => "aux_buffer",
            Self::Format(_) => "format",
            Self::MixerFormat(_) => "mixer_format",
            Self::MixerChannelMask(_) => "mixer_channel_mask",
            Self::SampleRate(_) => "sample_rate",
            Self::Reset => "reset",
            Self::Remove => "remove",
            Self::Volume(..) => "volume",
            Self::AuxLevel(_) => "aux_level",
            Self::PlaybackRate(_) => "playback_rate",
        }
    }
}

/// Scratch accumulator in the mixer-internal format
enum Accum {
    Fixed(Vec<i32>),
    Float(Vec<f32>),
}

impl Accum {
    fn new(format: AudioFormat, len: usize) -> Self {
        match format {
            AudioFormat::PcmFloat => Self::Float(vec![0.0; len]),
            _ => Self::Fixed(vec![0; len]),
        }
    }

    fn view_mut(&mut self) -> AccumMut<'_> {
        match self {
            Self::Fixed(v) => AccumMut::Fixed(v),
            Self::Float(v) => AccumMut::Float(v),
        }
    }

    fn view(&self) -> AccumRef<'_> {
        match self {
            Self::Fixed(v) => AccumRef::Fixed(v),
            Self::Float(v) => AccumRef::Float(v),
        }
    }

    fn zero(&mut self, len: usize) {
        match self {
            Self::Fixed(v) => v[..len].fill(0),
            Self::Float(v) => v[..len].fill(0.0),
        }
    }
}

/// Indices of the set bits of `mask`, lowest first
fn bits(mut mask: u32) -> impl Iterator<Item = usize> {
    std::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let index = mask.trailing_zeros() as usize;
        mask &= mask - 1;
        Some(index)
    })
}

/// Tracks of `mask` sharing the main buffer of its lowest track
fn group_of(tracks: &[Option<Track>], mask: u32) -> u32 {
    let leader = mask.trailing_zeros() as usize;
    let buffer = tracks[leader].as_ref().and_then(|t| t.main_buffer);
    bits(mask)
        .filter(|&i| tracks[i].as_ref().and_then(|t| t.main_buffer) == buffer)
        .fold(0, |group, i| group | (1 << i))
}

/// Output view of a main buffer starting at sample `offset`
fn output_view(buf: &mut AlignedBuf, format: AudioFormat, offset: usize) -> Option<OutputMut<'_>> {
    match format {
        AudioFormat::Pcm16Bit => buf.as_i16_mut().get_mut(offset..).map(OutputMut::Pcm16),
        AudioFormat::PcmFloat => buf.as_f32_mut().get_mut(offset..).map(OutputMut::Float),
        _ => None,
    }
}

/// Aux accumulator of `track` starting at frame `offset`, when it sends
fn aux_view<'a>(aux_buffers: &'a mut [Vec<i32>], track: &Track, offset: usize) -> Option<&'a mut [i32]> {
    if !track.needs.aux {
        return None;
    }
    track
        .aux_buffer
        .and_then(|id| aux_buffers.get_mut(id.0))
        .and_then(|buf| buf.get_mut(offset..))
}

/// Multi-track PCM mixer
pub struct Mixer {
    config: MixerConfig,
    factory: Box<dyn ResamplerFactory>,
    tracks: Vec<Option<Track>>,
    /// Allocated track slots
    track_names: u32,
    /// Tracks enabled as of their last validation
    enabled: u32,
    /// Enabled tracks that passed buffer checks; the ones processed
    active: u32,
    /// Tracks changed since the last validation
    needs_changed: u32,
    hook: ProcessHook,
    main_buffers: Vec<AlignedBuf>,
    aux_buffers: Vec<Vec<i32>>,
    /// Accumulator of the block-wise strategy
    block: Accum,
    /// Whole-call accumulator, allocated on first resampling
    out_temp: Option<Accum>,
    /// Unity-gain resampler output, allocated with `out_temp`
    resample_temp: Option<Accum>,
}

impl Mixer {
    pub fn new(config: MixerConfig) -> MixerResult<Self> {
        config.validate()?;
        log::info!(
            "Mixer::new: {} frames at {} Hz, {} tracks, {:?} mixing",
            config.frame_count,
            config.sample_rate,
            config.max_tracks,
            config.mixer_in_format()
        );
        let block = Accum::new(config.mixer_in_format(), config.block_frames * MAX_NUM_CHANNELS);
        Ok(Self {
            factory: Box::new(DefaultResamplerFactory),
            tracks: (0..config.max_tracks).map(|_| None).collect(),
            track_names: 0,
            enabled: 0,
            active: 0,
            needs_changed: 0,
            hook: ProcessHook::Nop,
            main_buffers: Vec::new(),
            aux_buffers: Vec::new(),
            block,
            out_temp: None,
            resample_temp: None,
            config,
        })
    }

    /// Replace the factory used for resamplers created from now on
    pub fn with_resampler_factory(mut self, factory: impl ResamplerFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Buffers
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocate a main output buffer
    ///
    /// Sized for one call at the widest layout and format; `process()`
    /// overwrites it.
    pub fn create_main_buffer(&mut self) -> BufferId {
        self.main_buffers
            .push(AlignedBuf::new(self.config.frame_count * MAX_NUM_CHANNELS * 4));
        BufferId(self.main_buffers.len() - 1)
    }

    /// Allocate an aux buffer (Q4.27, one sample per frame)
    ///
    /// `process()` only adds into it; clearing it is up to the caller.
    pub fn create_aux_buffer(&mut self) -> AuxBufferId {
        self.aux_buffers.push(vec![0; self.config.frame_count]);
        AuxBufferId(self.aux_buffers.len() - 1)
    }

    pub fn main_buffer(&self, id: BufferId) -> MixerResult<&[u8]> {
        self.main_buffers
            .get(id.0)
            .map(AlignedBuf::as_bytes)
            .ok_or(MixerError::UnknownBuffer(id.0))
    }

    pub fn main_buffer_i16(&self, id: BufferId) -> MixerResult<&[i16]> {
        self.main_buffers
            .get(id.0)
            .map(AlignedBuf::as_i16)
            .ok_or(MixerError::UnknownBuffer(id.0))
    }

    pub fn main_buffer_f32(&self, id: BufferId) -> MixerResult<&[f32]> {
        self.main_buffers
            .get(id.0)
            .map(AlignedBuf::as_f32)
            .ok_or(MixerError::UnknownBuffer(id.0))
    }

    pub fn aux_buffer(&self, id: AuxBufferId) -> MixerResult<&[i32]> {
        self.aux_buffers
            .get(id.0)
            .map(Vec::as_slice)
            .ok_or(MixerError::UnknownBuffer(id.0))
    }

    pub fn aux_buffer_mut(&mut self, id: AuxBufferId) -> MixerResult<&mut [i32]> {
        self.aux_buffers
            .get_mut(id.0)
            .map(Vec::as_mut_slice)
            .ok_or(MixerError::UnknownBuffer(id.0))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tracks
    // ─────────────────────────────────────────────────────────────────────────

    fn pool_mask(&self) -> u32 {
        if self.config.max_tracks >= 32 {
            u32::MAX
        } else {
            (1 << self.config.max_tracks) - 1
        }
    }

    fn track(&self, name: TrackName) -> MixerResult<&Track> {
        self.tracks
            .get(name.0)
            .and_then(Option::as_ref)
            .ok_or(MixerError::InvalidTrackName(name))
    }

    fn track_mut(&mut self, name: TrackName) -> MixerResult<&mut Track> {
        self.tracks
            .get_mut(name.0)
            .and_then(Option::as_mut)
            .ok_or(MixerError::InvalidTrackName(name))
    }

    /// Allocate the lowest free track slot
    ///
    /// The track starts disabled at unity gain, mixing to 16-bit stereo at
    /// the device rate.
    pub fn get_track_name(
        &mut self,
        channel_mask: ChannelMask,
        format: AudioFormat,
        session_id: i32,
    ) -> MixerResult<TrackName> {
        if !channel_mask.is_valid() {
            log::error!("get_track_name: invalid channel mask {}", channel_mask);
            return Err(MixerError::InvalidChannelMask(channel_mask));
        }
        if !format.is_valid_track_format() {
            log::error!("get_track_name: invalid format {:?}", format);
            return Err(MixerError::InvalidFormat(format));
        }
        let free = !self.track_names & self.pool_mask();
        if free == 0 {
            log::error!("get_track_name: out of available tracks (max {})", self.config.max_tracks);
            return Err(MixerError::NoFreeTracks {
                max: self.config.max_tracks,
            });
        }
        let name = TrackName::new(free.trailing_zeros() as usize);
        self.tracks[name.0] = Some(Track::new(channel_mask, format, session_id, &self.config));
        self.track_names |= name.mask();
        log::debug!(
            "get_track_name: {} ({}, {:?}, session {})",
            name,
            channel_mask,
            format,
            session_id
        );
        Ok(name)
    }

    /// Free a track slot, dropping its resampler and provider chain
    pub fn delete_track_name(&mut self, name: TrackName) -> MixerResult<()> {
        let slot = self
            .tracks
            .get_mut(name.0)
            .ok_or(MixerError::InvalidTrackName(name))?;
        if slot.take().is_none() {
            return Err(MixerError::InvalidTrackName(name));
        }
        self.track_names &= !name.mask();
        self.needs_changed |= name.mask();
        log::debug!("delete_track_name: {}", name);
        Ok(())
    }

    pub fn enable(&mut self, name: TrackName) -> MixerResult<()> {
        let track = self.track_mut(name)?;
        if !track.enabled {
            track.enabled = true;
            self.needs_changed |= name.mask();
        }
        Ok(())
    }

    pub fn disable(&mut self, name: TrackName) -> MixerResult<()> {
        let track = self.track_mut(name)?;
        if track.enabled {
            track.enabled = false;
            self.needs_changed |= name.mask();
        }
        Ok(())
    }

    /// Attach (or detach) the track's input provider
    ///
    /// Adapter stages drop whatever they buffered from the previous provider.
    pub fn set_buffer_provider(
        &mut self,
        name: TrackName,
        provider: Option<Box<dyn BufferProvider>>,
    ) -> MixerResult<()> {
        let track = self.track_mut(name)?;
        track.release_input();
        track.chain.set_input(provider);
        Ok(())
    }

    /// Apply one parameter
    ///
    /// Returns whether anything changed. A refused parameter leaves the track
    /// untouched.
    pub fn set_parameter(&mut self, name: TrackName, target: Target, param: Param) -> MixerResult<bool> {
        let Self {
            config,
            factory,
            tracks,
            main_buffers,
            aux_buffers,
            needs_changed,
            ..
        } = self;
        let track = tracks
            .get_mut(name.0)
            .and_then(Option::as_mut)
            .ok_or(MixerError::InvalidTrackName(name))?;
        let factory = &**factory;
        let bad = || MixerError::BadParameter {
            target: target.name(),
            param: param.name(),
        };

        let (changed, invalidate) = match (target, param) {
            (Target::Track, Param::ChannelMask(mask)) => {
                if !mask.is_valid() {
                    return Err(MixerError::InvalidChannelMask(mask));
                }
                let mixer_mask = track.mixer_channel_mask;
                let changed = track.set_channel_masks(mask, mixer_mask, config, factory);
                (changed, changed)
            }
            (Target::Track, Param::MixerChannelMask(mask)) => {
                if !mask.is_valid() {
                    return Err(MixerError::InvalidChannelMask(mask));
                }
                let track_mask = track.channel_mask;
                let changed = track.set_channel_masks(track_mask, mask, config, factory);
                (changed, changed)
            }
            (Target::Track, Param::MainBuffer(id)) => {
                if let Some(id) = id.filter(|id| id.0 >= main_buffers.len()) {
                    return Err(MixerError::UnknownBuffer(id.0));
                }
                let changed = track.main_buffer != id;
                track.main_buffer = id;
                (changed, changed)
            }
            (Target::Track, Param::AuxBuffer(id)) => {
                if let Some(id) = id.filter(|id| id.0 >= aux_buffers.len()) {
                    return Err(MixerError::UnknownBuffer(id.0));
                }
                let changed = track.aux_buffer != id;
                track.aux_buffer = id;
                (changed, changed)
            }
            (Target::Track, Param::Format(format)) => {
                if !format.is_valid_track_format() {
                    return Err(MixerError::InvalidFormat(format));
                }
                let changed = track.set_format(format, config);
                (changed, changed)
            }
            (Target::Track, Param::MixerFormat(format)) => {
                if !format.is_valid_mixer_format() {
                    return Err(MixerError::InvalidMixerFormat(format));
                }
                let changed = track.mixer_format != format;
                track.mixer_format = format;
                (changed, changed)
            }
            (Target::Resample, Param::SampleRate(rate)) => {
                if rate == 0 {
                    return Err(MixerError::InvalidSampleRate(rate));
                }
                let changed = track.set_resampler(rate, config, factory);
                (changed, changed)
            }
            (Target::Resample, Param::Reset) => {
                track.reset_resampler();
                (true, false)
            }
            (Target::Resample, Param::Remove) => {
                track.remove_resampler(config);
                (true, true)
            }
            (Target::Volume | Target::RampVolume, Param::Volume(channel, value)) => {
                if channel >= MAX_NUM_VOLUMES {
                    return Err(bad());
                }
                let ramp = if target == Target::RampVolume { config.frame_count } else { 0 };
                let changed = track.volume.main[channel].set_target(value, ramp);
                (changed, changed)
            }
            (Target::Volume | Target::RampVolume, Param::AuxLevel(value)) => {
                let ramp = if target == Target::RampVolume { config.frame_count } else { 0 };
                let changed = track.volume.aux.set_target(value, ramp);
                (changed, changed)
            }
            (Target::Timestretch, Param::PlaybackRate(rate)) => {
                (track.set_playback_rate(rate, config), false)
            }
            _ => return Err(bad()),
        };
        if invalidate {
            *needs_changed |= name.mask();
        }
        Ok(changed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Input frames held inside the track's resampler
    pub fn unreleased_frames(&self, name: TrackName) -> MixerResult<usize> {
        Ok(self.track(name)?.unreleased_frames())
    }

    pub fn is_enabled(&self, name: TrackName) -> MixerResult<bool> {
        Ok(self.track(name)?.enabled)
    }

    pub fn session_id(&self, name: TrackName) -> MixerResult<i32> {
        Ok(self.track(name)?.session_id)
    }

    pub fn volume(&self, name: TrackName) -> MixerResult<&VolumeState> {
        Ok(&self.track(name)?.volume)
    }

    /// Needs derived by the last validation
    pub fn needs(&self, name: TrackName) -> MixerResult<Needs> {
        Ok(self.track(name)?.needs)
    }

    pub fn track_hook(&self, name: TrackName) -> MixerResult<TrackHook> {
        Ok(self.track(name)?.hook)
    }

    /// Strategy the next call runs when nothing changes
    pub fn process_hook(&self) -> ProcessHook {
        self.hook
    }

    /// Whether the next call revalidates
    pub fn needs_validate(&self) -> bool {
        self.needs_changed != 0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Mix one call's worth of frames into every active main buffer
    pub fn process(&mut self) {
        if self.needs_changed != 0 {
            self.validate();
        } else {
            self.run(self.hook);
        }
    }

    fn run(&mut self, hook: ProcessHook) {
        match hook {
            ProcessHook::Nop => self.process_nop(),
            ProcessHook::GenericNoResampling => self.process_generic_no_resampling(),
            ProcessHook::GenericResampling => self.process_generic_resampling(),
            ProcessHook::NoResampleOneTrack => self.process_one_track(),
        }
    }

    /// Tracks that can actually be mixed this time around
    fn active_tracks(&self) -> u32 {
        let mut active = 0u32;
        for i in bits(self.enabled) {
            let Some(track) = self.tracks[i].as_ref() else {
                continue;
            };
            let Some(buffer) = track.main_buffer else {
                log::warn!("validate: track{} enabled without a main buffer", i);
                continue;
            };
            let leader = bits(active)
                .filter_map(|j| self.tracks[j].as_ref())
                .find(|t| t.main_buffer == Some(buffer));
            if let Some(leader) = leader {
                if leader.mixer_channel_count != track.mixer_channel_count
                    || leader.mixer_format != track.mixer_format
                {
                    log::warn!(
                        "validate: track{} layout differs from others sharing buffer {}",
                        i,
                        buffer.index()
                    );
                    continue;
                }
            }
            active |= 1 << i;
        }
        active
    }

    /// Mute flag and single-track eligibility of the only active track
    fn single_track(&self) -> Option<(bool, bool)> {
        if self.active.count_ones() != 1 {
            return None;
        }
        let track = self.tracks[self.active.trailing_zeros() as usize].as_ref()?;
        let supported = ProcessHook::one_track_supported(
            track.mixer_channel_count,
            track.mixer_in_format,
            track.mixer_format,
        ) && !track.is_ramping()
            && track.hook != TrackHook::Nop;
        Some((track.needs.mute, supported))
    }

    fn validate(&mut self) {
        let dirty = self.needs_changed;
        self.needs_changed = 0;
        let mut enabled = self.enabled & !dirty;
        for i in bits(dirty) {
            if self.tracks.get(i).and_then(Option::as_ref).is_some_and(|t| t.enabled) {
                enabled |= 1 << i;
            }
        }
        self.enabled = enabled;
        self.active = self.active_tracks();

        let mut validation = Validation::default();
        for i in bits(self.active) {
            let Some(track) = self.tracks[i].as_mut() else {
                continue;
            };
            let summary = track.summary();
            track.needs = Needs::derive(&summary);
            track.hook = TrackHook::select(&track.needs, &summary);
            validation.add(&track.needs, summary.ramping);
        }

        let hook = validation.select(self.single_track());
        if hook == ProcessHook::GenericResampling && self.out_temp.is_none() {
            let len = self.config.frame_count * MAX_NUM_CHANNELS;
            self.out_temp = Some(Accum::new(self.config.mixer_in_format(), len));
            self.resample_temp = Some(Accum::new(self.config.mixer_in_format(), len));
        }
        log::debug!(
            "validate: {} active (mask {:#x}), plain {}, resampling {}, ramp {} -> {:?}",
            validation.active,
            self.active,
            validation.plain,
            validation.resampling,
            validation.volume_ramp,
            hook
        );
        self.hook = hook;
        self.run(hook);

        if validation.active == 0 {
            return;
        }
        let mut all_muted = true;
        for i in bits(self.active) {
            let Some(track) = self.tracks[i].as_mut() else {
                continue;
            };
            if is_mute(&track.summary()) {
                track.needs.mute = true;
                track.hook = TrackHook::Nop;
            } else {
                all_muted = false;
            }
        }
        self.hook = settle(self.hook, &validation, all_muted, self.single_track());
    }

    /// Zero each destination once and drain unmuted tracks
    fn process_nop(&mut self) {
        let Self {
            config,
            tracks,
            main_buffers,
            active,
            ..
        } = self;
        let mut remaining = *active;
        while remaining != 0 {
            let group = group_of(tracks, remaining);
            remaining &= !group;
            if let Some(leader) = tracks[group.trailing_zeros() as usize].as_ref() {
                let bytes = config.frame_count * leader.mixer_format.frame_size(leader.mixer_channel_count);
                if let Some(buf) = leader.main_buffer.and_then(|id| main_buffers.get_mut(id.0)) {
                    buf.as_bytes_mut()[..bytes].fill(0);
                }
            }
            for i in bits(group) {
                if let Some(track) = tracks[i].as_mut().filter(|t| !t.needs.mute) {
                    track.drain(config.frame_count);
                }
            }
        }
    }

    /// Accumulate each group block by block, converting every block
    fn process_generic_no_resampling(&mut self) {
        let Self {
            config,
            tracks,
            main_buffers,
            aux_buffers,
            block,
            active,
            ..
        } = self;
        let frame_count = config.frame_count;
        let mut remaining = *active;
        while remaining != 0 {
            let group = group_of(tracks, remaining);
            remaining &= !group;
            let Some(leader) = tracks[group.trailing_zeros() as usize].as_ref() else {
                continue;
            };
            let (channels, out_format) = (leader.mixer_channel_count, leader.mixer_format);
            let Some(buffer) = leader.main_buffer else {
                continue;
            };

            // Tracks that ran dry stay out for the rest of the call
            let mut dropped = 0u32;
            let mut num_frames = 0;
            while num_frames < frame_count {
                let frames = config.block_frames.min(frame_count - num_frames);
                block.zero(frames * channels);
                for i in bits(group & !dropped) {
                    let Some(track) = tracks[i].as_mut() else {
                        continue;
                    };
                    if track.hook == TrackHook::Nop {
                        continue;
                    }
                    let aux = aux_view(aux_buffers, track, num_frames);
                    let mixed = track.mix_input(block.view_mut(), aux, frames, frame_count - num_frames);
                    if mixed < frames {
                        dropped |= 1 << i;
                    }
                }
                if let Some(out) = main_buffers
                    .get_mut(buffer.0)
                    .and_then(|buf| output_view(buf, out_format, num_frames * channels))
                {
                    convert_mixer_format(out, block.view(), frames * channels);
                }
                num_frames += frames;
            }

            for i in bits(group) {
                if let Some(track) = tracks[i].as_mut() {
                    track.release_input();
                }
            }
        }
    }

    /// Accumulate each group over the whole call, then convert once
    fn process_generic_resampling(&mut self) {
        let Self {
            config,
            tracks,
            main_buffers,
            aux_buffers,
            out_temp,
            resample_temp,
            active,
            ..
        } = self;
        let (Some(out_temp), Some(resample_temp)) = (out_temp.as_mut(), resample_temp.as_mut()) else {
            log::error!("process_generic_resampling: scratch buffers missing");
            return;
        };
        let frame_count = config.frame_count;
        let mut remaining = *active;
        while remaining != 0 {
            let group = group_of(tracks, remaining);
            remaining &= !group;
            let Some(leader) = tracks[group.trailing_zeros() as usize].as_ref() else {
                continue;
            };
            let (channels, out_format) = (leader.mixer_channel_count, leader.mixer_format);
            let Some(buffer) = leader.main_buffer else {
                continue;
            };

            out_temp.zero(frame_count * channels);
            for i in bits(group) {
                let Some(track) = tracks[i].as_mut() else {
                    continue;
                };
                if track.hook == TrackHook::Nop {
                    continue;
                }
                let aux = aux_view(aux_buffers, track, 0);
                if track.needs.resample {
                    track.resample_into(out_temp.view_mut(), resample_temp.view_mut(), aux, frame_count);
                } else {
                    track.mix_input(out_temp.view_mut(), aux, frame_count, frame_count);
                    track.release_input();
                }
            }
            if let Some(out) = main_buffers
                .get_mut(buffer.0)
                .and_then(|buf| output_view(buf, out_format, 0))
            {
                convert_mixer_format(out, out_temp.view(), frame_count * channels);
            }
        }
    }

    /// Single plain track written straight to its buffer
    fn process_one_track(&mut self) {
        let Self {
            config,
            tracks,
            main_buffers,
            active,
            ..
        } = self;
        let Some(track) = tracks.get_mut(active.trailing_zeros() as usize).and_then(Option::as_mut) else {
            return;
        };
        let format = track.mixer_format;
        if let Some(out) = track
            .main_buffer
            .and_then(|id| main_buffers.get_mut(id.0))
            .and_then(|buf| output_view(buf, format, 0))
        {
            track.mix_direct(out, config.frame_count);
        }
    }
}
