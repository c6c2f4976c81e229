//! Per-track state
//!
//! A track owns its provider chain and resampler. The chain is rebuilt here
//! whenever a channel mask or format changes:
//!
//! | Condition                                      | Stages installed                         |
//! |------------------------------------------------|------------------------------------------|
//! | masks equal, or mono track into stereo mixer   | no channel stage                         |
//! | positional mask, downmix effect available      | downmix (16-bit), reformats around it    |
//! | anything else                                  | remix in the mixer-internal format       |
//! | track format differs from the stage's input    | reformat before the channel stage        |
//!
//! The resampler and the timestretch stage see the channel count coming out
//! of the chain: the mixer count behind a channel stage, the track count
//! otherwise.

use super::hooks::{Needs, TrackHook, TrackSummary, TrackType};
use super::kernels::{volume_mix, Accumulate, StoreF32, StoreI16};
use crate::buffer::{AuxBufferId, BufferId};
use crate::config::MixerConfig;
use crate::format::{AccumMut, OutputMut};
use crate::provider::{
    BufferProvider, Downmix, DownmixStage, ProviderChain, ProviderStage, ReformatStage,
    RemixStage, StageSlot, TimestretchStage,
};
use crate::resampler::{is_music_rate, Resampler, ResamplerFactory, ResamplerQuality};
use crate::types::{AudioFormat, ChannelMask, PlaybackRate};
use crate::volume::VolumeState;

/// One mixer input slot
pub(crate) struct Track {
    pub needs: Needs,
    pub hook: TrackHook,
    pub volume: VolumeState,
    pub main_buffer: Option<BufferId>,
    pub aux_buffer: Option<AuxBufferId>,
    /// Native rate of the track (the device rate without a resampler)
    pub sample_rate: u32,
    resampler: Option<Box<dyn Resampler>>,
    pub channel_mask: ChannelMask,
    pub channel_count: usize,
    pub format: AudioFormat,
    /// Format written to the main buffer
    pub mixer_format: AudioFormat,
    /// Format the chain delivers to the kernels
    pub mixer_in_format: AudioFormat,
    pub mixer_channel_mask: ChannelMask,
    pub mixer_channel_count: usize,
    pub session_id: i32,
    pub enabled: bool,
    /// Working format of the downmix effect stage, when one is installed
    downmix_requires_format: Option<AudioFormat>,
    pub playback_rate: PlaybackRate,
    pub chain: ProviderChain,
    /// Frames of the input buffer currently acquired from the chain
    in_frames: usize,
    /// Frames of that buffer already mixed
    in_pos: usize,
}

impl Track {
    pub fn new(
        channel_mask: ChannelMask,
        format: AudioFormat,
        session_id: i32,
        config: &MixerConfig,
    ) -> Self {
        let mut track = Self {
            needs: Needs::default(),
            hook: TrackHook::Nop,
            volume: VolumeState::new(),
            main_buffer: None,
            aux_buffer: None,
            sample_rate: config.sample_rate,
            resampler: None,
            channel_mask,
            channel_count: channel_mask.count(),
            format,
            mixer_format: AudioFormat::Pcm16Bit,
            mixer_in_format: config.mixer_in_format(),
            mixer_channel_mask: ChannelMask::STEREO,
            mixer_channel_count: ChannelMask::STEREO.count(),
            session_id,
            enabled: false,
            downmix_requires_format: None,
            playback_rate: PlaybackRate::default(),
            chain: ProviderChain::new(),
            in_frames: 0,
            in_pos: 0,
        };
        track.prepare_for_downmix(config);
        track.prepare_for_reformat(config);
        track
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Derived state
    // ─────────────────────────────────────────────────────────────────────────

    /// Mono track duplicated into a stereo mixer by the kernel
    pub fn is_mono_expand(&self) -> bool {
        self.channel_mask == ChannelMask::MONO && self.mixer_channel_mask == ChannelMask::STEREO
    }

    /// Channels per frame at the end of the copying stages
    pub fn chain_channels(&self) -> usize {
        if self.chain.has_stage(StageSlot::Downmix) {
            self.mixer_channel_count
        } else {
            self.channel_count
        }
    }

    pub fn does_resample(&self) -> bool {
        self.resampler.is_some()
    }

    /// Aux send attached and either audible or still ramping
    pub fn aux_active(&self) -> bool {
        self.aux_buffer.is_some() && (self.volume.aux.target != 0 || self.volume.aux.is_ramping())
    }

    /// Any ramp the kernels must advance
    pub fn is_ramping(&self) -> bool {
        self.volume.main_ramping() || (self.aux_active() && self.volume.aux.is_ramping())
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            channel_count: self.channel_count,
            resample: self.does_resample(),
            aux: self.aux_active(),
            ramping: self.is_ramping(),
            silent: self.volume.is_silent_target(),
            mono_expand: self.is_mono_expand(),
            mixer_channel_count: self.mixer_channel_count,
            mixer_in_format: self.mixer_in_format,
        }
    }

    pub fn unreleased_frames(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.unreleased_frames())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chain policy
    // ─────────────────────────────────────────────────────────────────────────

    fn prepare_for_downmix(&mut self, config: &MixerConfig) {
        self.downmix_requires_format = None;
        let stage: Option<Box<dyn ProviderStage>> =
            if self.is_mono_expand() || self.channel_mask == self.mixer_channel_mask {
                None
            } else {
                let downmix = if config.downmix_effect && self.channel_mask.is_positional() {
                    DownmixStage::downmix(
                        self.channel_mask,
                        self.mixer_channel_mask,
                        config.copy_buffer_frames,
                    )
                } else {
                    None
                };
                match downmix {
                    Some(stage) => {
                        self.downmix_requires_format = Some(Downmix::FORMAT);
                        Some(Box::new(stage))
                    }
                    None => Some(Box::new(RemixStage::remix(
                        self.channel_mask,
                        self.mixer_channel_mask,
                        self.mixer_in_format,
                        config.copy_buffer_frames,
                    ))),
                }
            };
        self.chain.set_stage(StageSlot::Downmix, stage);
    }

    fn prepare_for_reformat(&mut self, config: &MixerConfig) {
        let target = self.downmix_requires_format.unwrap_or(self.mixer_in_format);
        let reformat: Option<Box<dyn ProviderStage>> = (self.format != target).then(|| {
            Box::new(ReformatStage::reformat(
                self.channel_count,
                self.format,
                target,
                config.copy_buffer_frames,
            )) as Box<dyn ProviderStage>
        });
        self.chain.set_stage(StageSlot::Reformat, reformat);

        let post: Option<Box<dyn ProviderStage>> = match self.downmix_requires_format {
            Some(format) if format != self.mixer_in_format => Some(Box::new(ReformatStage::reformat(
                self.mixer_channel_count,
                format,
                self.mixer_in_format,
                config.copy_buffer_frames,
            ))),
            _ => None,
        };
        self.chain.set_stage(StageSlot::PostDownmixReformat, post);
    }

    /// Change the native sample format
    pub fn set_format(&mut self, format: AudioFormat, config: &MixerConfig) -> bool {
        if format == self.format {
            return false;
        }
        self.format = format;
        self.prepare_for_reformat(config);
        true
    }

    /// Change the track and/or mixer channel masks
    ///
    /// Rebuilds the channel and reformat stages. A resampler or timestretch
    /// stage whose channel count no longer matches the chain is recreated
    /// with the same rate.
    pub fn set_channel_masks(
        &mut self,
        track_mask: ChannelMask,
        mixer_mask: ChannelMask,
        config: &MixerConfig,
        factory: &dyn ResamplerFactory,
    ) -> bool {
        if track_mask == self.channel_mask && mixer_mask == self.mixer_channel_mask {
            return false;
        }
        let old_mixer_count = self.mixer_channel_count;
        let old_chain_channels = self.chain_channels();

        self.channel_mask = track_mask;
        self.channel_count = track_mask.count();
        self.mixer_channel_mask = mixer_mask;
        self.mixer_channel_count = mixer_mask.count();

        self.prepare_for_downmix(config);
        self.prepare_for_reformat(config);

        let chain_channels = self.chain_channels();
        let stretch_channels = self.chain.timestretch_mut().map(|ts| ts.channels());
        if stretch_channels.is_some_and(|ch| ch != chain_channels) {
            self.chain.set_timestretch(Some(self.make_timestretch(config)));
        }

        if self.resampler.is_some()
            && (old_mixer_count != self.mixer_channel_count || old_chain_channels != chain_channels)
        {
            self.resampler = None;
            self.create_resampler(config, factory);
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resampler
    // ─────────────────────────────────────────────────────────────────────────

    /// Follow a new native rate, creating the resampler on first need
    ///
    /// Once created the resampler stays until removed, even when the rate
    /// returns to the device rate.
    pub fn set_resampler(
        &mut self,
        track_rate: u32,
        config: &MixerConfig,
        factory: &dyn ResamplerFactory,
    ) -> bool {
        if track_rate == config.sample_rate && self.resampler.is_none() {
            return false;
        }
        if track_rate == self.sample_rate {
            return false;
        }
        self.sample_rate = track_rate;
        if self.resampler.is_none() {
            self.create_resampler(config, factory);
        }
        true
    }

    fn create_resampler(&mut self, config: &MixerConfig, factory: &dyn ResamplerFactory) {
        // Other rates are usually dynamic; the short filter keeps retuning cheap
        let quality = if is_music_rate(self.sample_rate) {
            config.default_quality()
        } else {
            ResamplerQuality::DynLow
        };
        let channels = self.chain_channels();
        log::debug!(
            "set_resampler: {} Hz -> {} Hz, {} channels, {:?}",
            self.sample_rate,
            config.sample_rate,
            channels,
            quality
        );
        self.resampler = Some(factory.create(
            self.mixer_in_format,
            channels,
            self.mixer_channel_count,
            config.sample_rate,
            quality,
        ));
    }

    pub fn reset_resampler(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Drop the resampler; the track follows the device rate again
    pub fn remove_resampler(&mut self, config: &MixerConfig) {
        self.resampler = None;
        self.sample_rate = config.sample_rate;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Timestretch
    // ─────────────────────────────────────────────────────────────────────────

    fn make_timestretch(&self, config: &MixerConfig) -> TimestretchStage {
        TimestretchStage::new(
            self.chain_channels(),
            self.mixer_in_format,
            self.sample_rate,
            self.playback_rate,
            config.copy_buffer_frames,
        )
    }

    /// Change speed and pitch
    ///
    /// Jitter below the minimum deltas never creates a stage.
    pub fn set_playback_rate(&mut self, rate: PlaybackRate, config: &MixerConfig) -> bool {
        if (!self.chain.has_timestretch() && rate.is_close_to(&self.playback_rate))
            || rate.is_equal(&self.playback_rate)
        {
            return false;
        }
        self.playback_rate = rate;
        match self.chain.timestretch_mut() {
            Some(ts) => ts.set_playback_rate(rate),
            None => {
                let stage = self.make_timestretch(config);
                self.chain.set_timestretch(Some(stage));
            }
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Kernels
    // ─────────────────────────────────────────────────────────────────────────

    /// Give back the partially mixed input buffer, if any
    pub fn release_input(&mut self) {
        if self.in_frames > 0 {
            self.chain.release_buffer(self.in_pos);
        }
        self.in_frames = 0;
        self.in_pos = 0;
    }

    /// Mix `frames` frames of chain input into `out` without resampling
    ///
    /// Input is acquired as needed, asking for `remaining` frames (the rest of
    /// the call) each time; the last buffer stays held across calls to this
    /// method until [`Self::release_input`]. Returns the frames mixed, fewer
    /// than `frames` when the chain ran dry.
    pub fn mix_input(
        &mut self,
        mut out: AccumMut<'_>,
        mut aux: Option<&mut [i32]>,
        frames: usize,
        remaining: usize,
    ) -> usize {
        let TrackHook::Mix {
            kind,
            channels,
            format,
        } = self.hook
        else {
            return 0;
        };
        let expand = kind == TrackType::NoResampleMono;
        let frame_size = format.frame_size(if expand { 1 } else { channels });
        let ramp = self.is_ramping();
        let aux_on = aux.is_some();

        let mut done = 0;
        while done < frames {
            if self.in_pos == self.in_frames {
                self.release_input();
                match self.chain.get_next_buffer(remaining.saturating_sub(done).max(frames - done)) {
                    Some(n) => self.in_frames = n,
                    None => break,
                }
            }
            let n = (self.in_frames - self.in_pos).min(frames - done);
            let bytes = self
                .chain
                .buffer()
                .get(self.in_pos * frame_size..(self.in_pos + n) * frame_size);
            let aux_block = aux.as_deref_mut().map(|a| &mut a[done..]);
            let volume = &mut self.volume;
            let mixed = match (out.reborrow(), bytes) {
                (AccumMut::Fixed(acc), Some(bytes)) if format == AudioFormat::Pcm16Bit => {
                    bytemuck::try_cast_slice::<u8, i16>(bytes)
                        .map(|input| {
                            volume_mix::<i16, Accumulate>(
                                channels,
                                expand,
                                &mut acc[done * channels..],
                                n,
                                input,
                                aux_block,
                                volume,
                                ramp,
                            )
                        })
                        .is_ok()
                }
                (AccumMut::Float(acc), Some(bytes)) if format == AudioFormat::PcmFloat => {
                    bytemuck::try_cast_slice::<u8, f32>(bytes)
                        .map(|input| {
                            volume_mix::<f32, Accumulate>(
                                channels,
                                expand,
                                &mut acc[done * channels..],
                                n,
                                input,
                                aux_block,
                                volume,
                                ramp,
                            )
                        })
                        .is_ok()
                }
                _ => false,
            };
            if !mixed {
                log::error!(
                    "mix_input: unusable input buffer ({:?}, {} channels), {} frames skipped",
                    format,
                    channels,
                    n
                );
            } else if ramp {
                self.volume
                    .adjust_volume_ramp(aux_on, format == AudioFormat::PcmFloat);
            }
            self.in_pos += n;
            done += n;
        }
        done
    }

    /// Resample `frames` output frames into `out`
    ///
    /// With a ramp or an aux send the resampler runs at unity gain into
    /// `temp`, and the gains are applied in a second pass.
    pub fn resample_into(
        &mut self,
        out: AccumMut<'_>,
        temp: AccumMut<'_>,
        aux: Option<&mut [i32]>,
        frames: usize,
    ) -> usize {
        let channels = self.mixer_channel_count;
        let ramp = self.is_ramping();
        let aux_on = aux.is_some();
        let sample_rate = self.sample_rate;
        let Some(resampler) = self.resampler.as_mut() else {
            return 0;
        };
        resampler.set_sample_rate(sample_rate);

        if !ramp && !aux_on {
            resampler.set_volume(self.volume.main[0].target_f, self.volume.main[1].target_f);
            return resampler.resample(out, frames, &mut self.chain);
        }

        resampler.set_volume(1.0, 1.0);
        let len = frames * channels;
        match (out, temp) {
            (AccumMut::Fixed(out), AccumMut::Fixed(temp)) => {
                let temp = &mut temp[..len];
                temp.fill(0);
                let produced = resampler.resample(AccumMut::Fixed(&mut *temp), frames, &mut self.chain);
                volume_mix::<i32, Accumulate>(channels, false, out, frames, temp, aux, &mut self.volume, ramp);
                if ramp {
                    self.volume.adjust_volume_ramp(aux_on, false);
                }
                produced
            }
            (AccumMut::Float(out), AccumMut::Float(temp)) => {
                let temp = &mut temp[..len];
                temp.fill(0.0);
                let produced = resampler.resample(AccumMut::Float(&mut *temp), frames, &mut self.chain);
                volume_mix::<f32, Accumulate>(channels, false, out, frames, temp, aux, &mut self.volume, ramp);
                if ramp {
                    self.volume.adjust_volume_ramp(aux_on, true);
                }
                produced
            }
            _ => {
                log::error!("resample_into: accumulator and scratch formats differ");
                0
            }
        }
    }

    /// Write `frames` frames straight into the output buffer
    ///
    /// Steady gain, no aux. Missing or misaligned input leaves silence for
    /// the rest of the call.
    pub fn mix_direct(&mut self, mut out: OutputMut<'_>, frames: usize) {
        let channels = self.mixer_channel_count;
        let format = self.mixer_in_format;
        let frame_size = format.frame_size(channels);

        let mut done = 0;
        while done < frames {
            let Some(n) = self.chain.get_next_buffer(frames - done) else {
                break;
            };
            let n = n.min(frames - done);
            let offset = done * channels;
            let bytes = self.chain.buffer().get(..n * frame_size);
            let volume = &mut self.volume;
            let written = match (&mut out, format, bytes) {
                (OutputMut::Pcm16(o), AudioFormat::Pcm16Bit, Some(b)) => bytemuck::try_cast_slice::<u8, i16>(b)
                    .map(|input| {
                        volume_mix::<i16, StoreI16>(channels, false, &mut o[offset..], n, input, None, volume, false)
                    })
                    .is_ok(),
                (OutputMut::Pcm16(o), AudioFormat::PcmFloat, Some(b)) => bytemuck::try_cast_slice::<u8, f32>(b)
                    .map(|input| {
                        volume_mix::<f32, StoreI16>(channels, false, &mut o[offset..], n, input, None, volume, false)
                    })
                    .is_ok(),
                (OutputMut::Float(o), AudioFormat::Pcm16Bit, Some(b)) => bytemuck::try_cast_slice::<u8, i16>(b)
                    .map(|input| {
                        volume_mix::<i16, StoreF32>(channels, false, &mut o[offset..], n, input, None, volume, false)
                    })
                    .is_ok(),
                (OutputMut::Float(o), AudioFormat::PcmFloat, Some(b)) => bytemuck::try_cast_slice::<u8, f32>(b)
                    .map(|input| {
                        volume_mix::<f32, StoreF32>(channels, false, &mut o[offset..], n, input, None, volume, false)
                    })
                    .is_ok(),
                _ => false,
            };
            self.chain.release_buffer(n);
            if !written {
                log::error!(
                    "process_one_track: misaligned input buffer, {} channels, {} frames silenced",
                    channels,
                    frames - done
                );
                break;
            }
            done += n;
        }

        let (start, end) = (done * channels, frames * channels);
        match out {
            OutputMut::Pcm16(o) => o[start..end].fill(0),
            OutputMut::Float(o) => o[start..end].fill(0.0),
        }
    }

    /// Pull and immediately release up to `frames` frames
    pub fn drain(&mut self, frames: usize) {
        let mut left = frames;
        while left > 0 {
            let Some(n) = self.chain.get_next_buffer(left) else {
                break;
            };
            let n = n.min(left);
            self.chain.release_buffer(n);
            left -= n;
        }
    }
}
