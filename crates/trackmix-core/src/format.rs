//! Sample format conversion
//!
//! Two families live here:
//!
//! - **Accumulator to output**: [`convert_mixer_format`] turns the mixer's
//!   internal accumulator (Q4.27 fixed point or float) into the output buffer
//!   format (16-bit PCM or float).
//! - **Stream reformat**: [`convert_samples`] converts between any linear PCM
//!   formats, reading unaligned source bytes. Used by the reformat stage.

use crate::types::AudioFormat;

// ─────────────────────────────────────────────────────────────────────────────
// Scalar conversions
// ─────────────────────────────────────────────────────────────────────────────

/// Saturate a 32-bit value to the 16-bit range
#[inline]
pub fn clamp16(sample: i32) -> i16 {
    if (sample >> 15) ^ (sample >> 31) != 0 {
        (0x7fff ^ (sample >> 31)) as i16
    } else {
        sample as i16
    }
}

/// Float [-1.0, 1.0) to 16-bit PCM, rounding to nearest and saturating
///
/// Adding 3 << 7 places the scaled value in the low 16 bits of the significand;
/// float bit patterns of one sign are ordered, so the clamp is an integer compare.
/// NaN saturates positive.
#[inline]
pub fn clamp16_from_float(f: f32) -> i16 {
    const OFFSET: f32 = (3 << (22 - 15)) as f32;
    const LIMNEG: i32 = (0x10f << 22) - 32768;
    const LIMPOS: i32 = (0x10f << 22) + 32767;
    let bits = (f + OFFSET).to_bits() as i32;
    if bits < LIMNEG {
        i16::MIN
    } else if bits > LIMPOS {
        i16::MAX
    } else {
        bits as i16
    }
}

/// Q4.27 to float
#[inline]
pub fn float_from_q4_27(v: i32) -> f32 {
    v as f32 * (1.0 / (1u32 << 27) as f32)
}

/// Float to Q4.27, rounding half away from zero and saturating at ±16.0
#[inline]
pub fn clampq4_27_from_float(f: f32) -> i32 {
    const SCALE: f32 = (1u32 << 27) as f32;
    if f <= -16.0 {
        i32::MIN
    } else if f >= 16.0 {
        i32::MAX
    } else {
        let scaled = f * SCALE;
        if scaled > 0.0 {
            (scaled + 0.5) as i32
        } else {
            (scaled - 0.5) as i32
        }
    }
}

/// 16-bit PCM to float
#[inline]
pub fn float_from_i16(v: i16) -> f32 {
    v as f32 * (1.0 / 32768.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Accumulator to output
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only view of the mixer accumulator
#[derive(Debug, Clone, Copy)]
pub enum AccumRef<'a> {
    /// Q4.27 fixed point (mixer fed by 16-bit PCM)
    Fixed(&'a [i32]),
    /// Float (mixer fed by float PCM)
    Float(&'a [f32]),
}

/// Writable view of the mixer accumulator
#[derive(Debug)]
pub enum AccumMut<'a> {
    Fixed(&'a mut [i32]),
    Float(&'a mut [f32]),
}

impl AccumMut<'_> {
    /// Reborrow with a shorter lifetime
    pub fn reborrow(&mut self) -> AccumMut<'_> {
        match self {
            Self::Fixed(s) => AccumMut::Fixed(s),
            Self::Float(s) => AccumMut::Float(s),
        }
    }

    /// Length in samples
    pub fn len(&self) -> usize {
        match self {
            Self::Fixed(s) => s.len(),
            Self::Float(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writable view of a mixer output buffer
#[derive(Debug)]
pub enum OutputMut<'a> {
    Pcm16(&'a mut [i16]),
    Float(&'a mut [f32]),
}

/// Convert `count` accumulated samples into the output format
///
/// Fixed-point sums lose their 12 fractional bits and saturate; float sums
/// are copied or rounded and saturated to 16 bits.
pub fn convert_mixer_format(out: OutputMut<'_>, input: AccumRef<'_>, count: usize) {
    match (input, out) {
        (AccumRef::Float(src), OutputMut::Float(dst)) => {
            dst[..count].copy_from_slice(&src[..count]);
        }
        (AccumRef::Float(src), OutputMut::Pcm16(dst)) => {
            for (d, &s) in dst[..count].iter_mut().zip(&src[..count]) {
                *d = clamp16_from_float(s);
            }
        }
        (AccumRef::Fixed(src), OutputMut::Float(dst)) => {
            for (d, &s) in dst[..count].iter_mut().zip(&src[..count]) {
                *d = float_from_q4_27(s);
            }
        }
        (AccumRef::Fixed(src), OutputMut::Pcm16(dst)) => {
            for (d, &s) in dst[..count].iter_mut().zip(&src[..count]) {
                *d = clamp16(s >> 12);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream reformat
// ─────────────────────────────────────────────────────────────────────────────

#[inline]
fn read_i16(b: &[u8]) -> i16 {
    i16::from_ne_bytes([b[0], b[1]])
}

#[inline]
fn read_i32(b: &[u8]) -> i32 {
    i32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
fn read_f32(b: &[u8]) -> f32 {
    f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

/// Packed 24-bit sample, sign-extended into the low 24 bits of an i32
#[inline]
fn read_i24(b: &[u8]) -> i32 {
    #[cfg(target_endian = "little")]
    let raw = i32::from_le_bytes([0, b[0], b[1], b[2]]);
    #[cfg(target_endian = "big")]
    let raw = i32::from_be_bytes([b[0], b[1], b[2], 0]);
    raw >> 8
}

#[inline]
fn write_i24(b: &mut [u8], v: i32) {
    #[cfg(target_endian = "little")]
    {
        let bytes = v.to_le_bytes();
        b.copy_from_slice(&bytes[..3]);
    }
    #[cfg(target_endian = "big")]
    {
        let bytes = v.to_be_bytes();
        b.copy_from_slice(&bytes[1..]);
    }
}

/// Decode one sample to 16-bit PCM
#[inline]
pub(crate) fn sample_to_i16(format: AudioFormat, b: &[u8]) -> i16 {
    match format {
        AudioFormat::Pcm8Bit => ((b[0] as i16) - 0x80) << 8,
        AudioFormat::Pcm16Bit => read_i16(b),
        AudioFormat::Pcm24BitPacked => (read_i24(b) >> 8) as i16,
        AudioFormat::Pcm32Bit => (read_i32(b) >> 16) as i16,
        AudioFormat::Pcm8_24Bit => clamp16(read_i32(b) >> 8),
        AudioFormat::PcmFloat => clamp16_from_float(read_f32(b)),
        AudioFormat::Mp3 | AudioFormat::Aac => 0,
    }
}

/// Decode one sample to float
#[inline]
pub(crate) fn sample_to_f32(format: AudioFormat, b: &[u8]) -> f32 {
    match format {
        AudioFormat::Pcm8Bit => ((b[0] as i32) - 0x80) as f32 * (1.0 / 128.0),
        AudioFormat::Pcm16Bit => float_from_i16(read_i16(b)),
        AudioFormat::Pcm24BitPacked => read_i24(b) as f32 * (1.0 / (1u32 << 23) as f32),
        AudioFormat::Pcm32Bit => read_i32(b) as f32 * (1.0 / (1u64 << 31) as f32),
        AudioFormat::Pcm8_24Bit => read_i32(b) as f32 * (1.0 / (1u32 << 23) as f32),
        AudioFormat::PcmFloat => read_f32(b),
        AudioFormat::Mp3 | AudioFormat::Aac => 0.0,
    }
}

/// Convert `count` samples from `src_format` to `dst_format`
///
/// Neither buffer needs to be aligned. Integer targets are produced from the
/// 16-bit or float decode depending on which keeps more precision.
pub fn convert_samples(
    dst: &mut [u8],
    dst_format: AudioFormat,
    src: &[u8],
    src_format: AudioFormat,
    count: usize,
) {
    let src_size = src_format.bytes_per_sample();
    let dst_size = dst_format.bytes_per_sample();
    if src_size == 0 || dst_size == 0 {
        return;
    }
    if src_format == dst_format {
        dst[..count * dst_size].copy_from_slice(&src[..count * src_size]);
        return;
    }

    let samples = src[..count * src_size]
        .chunks_exact(src_size)
        .zip(dst[..count * dst_size].chunks_exact_mut(dst_size));

    match dst_format {
        AudioFormat::Pcm16Bit => {
            for (s, d) in samples {
                d.copy_from_slice(&sample_to_i16(src_format, s).to_ne_bytes());
            }
        }
        AudioFormat::PcmFloat => {
            for (s, d) in samples {
                d.copy_from_slice(&sample_to_f32(src_format, s).to_ne_bytes());
            }
        }
        AudioFormat::Pcm8Bit => {
            for (s, d) in samples {
                d[0] = ((sample_to_i16(src_format, s) >> 8) + 0x80) as u8;
            }
        }
        AudioFormat::Pcm24BitPacked => {
            for (s, d) in samples {
                let f = sample_to_f32(src_format, s);
                let v = (f * (1u32 << 23) as f32).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                write_i24(d, v);
            }
        }
        AudioFormat::Pcm32Bit => {
            for (s, d) in samples {
                let f = sample_to_f32(src_format, s) as f64;
                let v = (f * (1u64 << 31) as f64)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                d.copy_from_slice(&v.to_ne_bytes());
            }
        }
        AudioFormat::Pcm8_24Bit => {
            for (s, d) in samples {
                let f = sample_to_f32(src_format, s);
                let v = (f * (1u32 << 23) as f32).round().clamp(i32::MIN as f32, i32::MAX as f32) as i32;
                d.copy_from_slice(&v.to_ne_bytes());
            }
        }
        AudioFormat::Mp3 | AudioFormat::Aac => {}
    }
}
