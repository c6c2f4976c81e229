//! Per-frame mixing kernels
//!
//! One generic loop, specialized at compile time over:
//!
//! | Parameter | Values                                                     |
//! |-----------|------------------------------------------------------------|
//! | `T`       | `i16` (Q0.15), `i32` (Q4.27 resampler output), `f32`       |
//! | `W`       | [`Accumulate`], [`StoreI16`], [`StoreF32`]                 |
//! | `N`       | output channels, 1..=8                                     |
//! | `EXPAND`  | one input channel duplicated into both outputs (`N == 2`)  |
//!
//! Integer input multiplies against the U4.12 target gain (steady) or the
//! upper bits of the U4.28 running gain (ramp), yielding Q4.27. Float input
//! multiplies against the float gains. With more than two channels every
//! channel follows gain 0.
//!
//! The aux send is always integer: the frame is folded to its mean in Q4.27
//! and scaled by the U4.12 aux level.

use crate::format::{clamp16, clamp16_from_float, clampq4_27_from_float, float_from_q4_27};
use crate::volume::{RampedGain, VolumeState};

/// Input sample type of a kernel
pub(crate) trait MixSample: Copy + bytemuck::Pod {
    /// Accumulator type the product lands in
    type Acc: Copy;

    /// Whether ramps advance in the float domain
    const FLOAT: bool;

    /// Sample times a steady gain
    fn mul_gain(self, gain: &RampedGain) -> Self::Acc;

    /// Sample times the running ramp value
    fn mul_ramp(self, gain: &RampedGain) -> Self::Acc;

    /// Advance a ramp by one frame in this type's domain
    fn step(gain: &mut RampedGain);

    /// Sample in Q4.27, for the aux fold
    fn to_q4_27(self) -> i32;
}

impl MixSample for i16 {
    type Acc = i32;
    const FLOAT: bool = false;

    #[inline]
    fn mul_gain(self, gain: &RampedGain) -> i32 {
        self as i32 * gain.target as i32
    }

    #[inline]
    fn mul_ramp(self, gain: &RampedGain) -> i32 {
        self as i32 * (gain.prev >> 16)
    }

    #[inline]
    fn step(gain: &mut RampedGain) {
        gain.prev = gain.prev.wrapping_add(gain.inc);
    }

    #[inline]
    fn to_q4_27(self) -> i32 {
        (self as i32) << 12
    }
}

impl MixSample for i32 {
    type Acc = i32;
    const FLOAT: bool = false;

    #[inline]
    fn mul_gain(self, gain: &RampedGain) -> i32 {
        (self >> 12).wrapping_mul(gain.target as i32)
    }

    #[inline]
    fn mul_ramp(self, gain: &RampedGain) -> i32 {
        (self >> 12).wrapping_mul(gain.prev >> 16)
    }

    #[inline]
    fn step(gain: &mut RampedGain) {
        gain.prev = gain.prev.wrapping_add(gain.inc);
    }

    #[inline]
    fn to_q4_27(self) -> i32 {
        self
    }
}

impl MixSample for f32 {
    type Acc = f32;
    const FLOAT: bool = true;

    #[inline]
    fn mul_gain(self, gain: &RampedGain) -> f32 {
        self * gain.target_f
    }

    #[inline]
    fn mul_ramp(self, gain: &RampedGain) -> f32 {
        self * gain.prev_f
    }

    #[inline]
    fn step(gain: &mut RampedGain) {
        gain.prev_f += gain.inc_f;
    }

    #[inline]
    fn to_q4_27(self) -> i32 {
        clampq4_27_from_float(self)
    }
}

/// How a kernel product reaches its destination
pub(crate) trait Writer<A> {
    type Out: Copy + bytemuck::Pod;

    fn write(slot: &mut Self::Out, value: A);
}

/// Add into a mixer accumulator
pub(crate) struct Accumulate;

/// Overwrite 16-bit output
pub(crate) struct StoreI16;

/// Overwrite float output
pub(crate) struct StoreF32;

impl Writer<i32> for Accumulate {
    type Out = i32;

    #[inline]
    fn write(slot: &mut i32, value: i32) {
        *slot = slot.wrapping_add(value);
    }
}

impl Writer<f32> for Accumulate {
    type Out = f32;

    #[inline]
    fn write(slot: &mut f32, value: f32) {
        *slot += value;
    }
}

impl Writer<i32> for StoreI16 {
    type Out = i16;

    #[inline]
    fn write(slot: &mut i16, value: i32) {
        *slot = clamp16(value >> 12);
    }
}

impl Writer<f32> for StoreI16 {
    type Out = i16;

    #[inline]
    fn write(slot: &mut i16, value: f32) {
        *slot = clamp16_from_float(value);
    }
}

impl Writer<i32> for StoreF32 {
    type Out = f32;

    #[inline]
    fn write(slot: &mut f32, value: i32) {
        *slot = float_from_q4_27(value);
    }
}

impl Writer<f32> for StoreF32 {
    type Out = f32;

    #[inline]
    fn write(slot: &mut f32, value: f32) {
        *slot = value;
    }
}

/// Main gain feeding output channel `c`
#[inline]
fn gain_index<const N: usize>(c: usize) -> usize {
    if N == 2 {
        c
    } else {
        0
    }
}

fn mix_frames<T, W, const N: usize, const EXPAND: bool>(
    out: &mut [W::Out],
    frames: usize,
    input: &[T],
    mut aux: Option<&mut [i32]>,
    vol: &mut VolumeState,
    ramp: bool,
) where
    T: MixSample,
    W: Writer<T::Acc>,
{
    let in_ch = if EXPAND { 1 } else { N };
    for (f, (frame, dst)) in input
        .chunks_exact(in_ch)
        .zip(out.chunks_exact_mut(N))
        .take(frames)
        .enumerate()
    {
        if let Some(aux) = aux.as_deref_mut() {
            let sum: i64 = frame.iter().map(|s| s.to_q4_27() as i64).sum();
            let mean = (sum / in_ch as i64) as i32;
            let level = if ramp {
                vol.aux.prev >> 16
            } else {
                vol.aux.target as i32
            };
            aux[f] = aux[f].wrapping_add((mean >> 12).wrapping_mul(level));
            if ramp {
                vol.aux.prev = vol.aux.prev.wrapping_add(vol.aux.inc);
            }
        }
        for (c, slot) in dst.iter_mut().enumerate() {
            let sample = if EXPAND { frame[0] } else { frame[c] };
            let gain = &vol.main[gain_index::<N>(c)];
            let value = if ramp {
                sample.mul_ramp(gain)
            } else {
                sample.mul_gain(gain)
            };
            W::write(slot, value);
        }
        // Both gains advance so a ramp on either one terminates
        if ramp {
            for gain in vol.main.iter_mut() {
                T::step(gain);
            }
        }
    }
}

/// Mix `frames` frames of `input` into `out`
///
/// `out` holds `channels` samples per frame; `input` holds one sample per
/// frame when `expand` is set, `channels` otherwise. Ramping advances the
/// gains in `vol` but leaves completion to the caller
/// ([`VolumeState::adjust_volume_ramp`]).
#[allow(clippy::too_many_arguments)]
pub(crate) fn volume_mix<T, W>(
    channels: usize,
    expand: bool,
    out: &mut [W::Out],
    frames: usize,
    input: &[T],
    aux: Option<&mut [i32]>,
    vol: &mut VolumeState,
    ramp: bool,
) where
    T: MixSample,
    W: Writer<T::Acc>,
{
    macro_rules! mix {
        ($n:literal, $expand:literal) => {
            mix_frames::<T, W, $n, $expand>(out, frames, input, aux, vol, ramp)
        };
    }
    match (channels, expand) {
        (2, true) => mix!(2, true),
        (1, false) => mix!(1, false),
        (2, false) => mix!(2, false),
        (3, false) => mix!(3, false),
        (4, false) => mix!(4, false),
        (5, false) => mix!(5, false),
        (6, false) => mix!(6, false),
        (7, false) => mix!(7, false),
        (8, false) => mix!(8, false),
        _ => log::error!(
            "volume_mix: unsupported channel count {} (expand {})",
            channels,
            expand
        ),
    }
}
