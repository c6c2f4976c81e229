//! Band-limited resampling via rubato
//!
//! rubato works in fixed chunks, so input frames are gathered until the engine
//! has a full chunk, and its output is drained through a FIFO across calls.
//! Both the gather buffer and the FIFO persist between calls, and survive
//! input rate changes: small changes glide the ratio in place, larger ones
//! rebuild the engine and carry the buffered frames over.

use rubato::{
    FastFixedOut, PolynomialDegree, ResampleError, Resampler as RubatoResampler,
    ResamplerConstructionError, SincFixedOut, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use super::{OutputMap, Resampler, ResamplerQuality};
use crate::format::{sample_to_f32, AccumMut};
use crate::provider::BufferProvider;
use crate::types::{AudioFormat, MAX_NUM_CHANNELS};

/// Output frames per rubato chunk
const CHUNK_FRAMES: usize = 64;

/// Allowed ratio drift before the engine must be rebuilt
const MAX_RELATIVE_RATIO: f64 = 1.1;

enum Engine {
    Sinc(SincFixedOut<f32>),
    Poly(FastFixedOut<f32>),
}

impl Engine {
    fn build(
        quality: ResamplerQuality,
        ratio: f64,
        channels: usize,
    ) -> Result<Self, ResamplerConstructionError> {
        let sinc = |sinc_len, oversampling_factor, interpolation| SincInterpolationParameters {
            sinc_len,
            f_cutoff: 0.95,
            interpolation,
            oversampling_factor,
            window: WindowFunction::BlackmanHarris2,
        };
        let engine = match quality {
            ResamplerQuality::Medium => Self::Poly(FastFixedOut::new(
                ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Cubic,
                CHUNK_FRAMES,
                channels,
            )?),
            ResamplerQuality::DynLow => Self::Sinc(SincFixedOut::new(
                ratio,
                MAX_RELATIVE_RATIO,
                sinc(32, 64, SincInterpolationType::Linear),
                CHUNK_FRAMES,
                channels,
            )?),
            ResamplerQuality::High | ResamplerQuality::Low => Self::Sinc(SincFixedOut::new(
                ratio,
                MAX_RELATIVE_RATIO,
                sinc(128, 256, SincInterpolationType::Cubic),
                CHUNK_FRAMES,
                channels,
            )?),
        };
        Ok(engine)
    }

    fn input_frames_next(&self) -> usize {
        match self {
            Self::Sinc(r) => r.input_frames_next(),
            Self::Poly(r) => r.input_frames_next(),
        }
    }

    fn output_frames_max(&self) -> usize {
        match self {
            Self::Sinc(r) => r.output_frames_max(),
            Self::Poly(r) => r.output_frames_max(),
        }
    }

    fn input_frames_max(&self) -> usize {
        match self {
            Self::Sinc(r) => r.input_frames_max(),
            Self::Poly(r) => r.input_frames_max(),
        }
    }

    /// Returns (input frames used, output frames written)
    fn process(&mut self, input: &[Vec<f32>], output: &mut [Vec<f32>]) -> Result<(usize, usize), ResampleError> {
        match self {
            Self::Sinc(r) => r.process_into_buffer(input, output, None),
            Self::Poly(r) => r.process_into_buffer(input, output, None),
        }
    }

    /// Ramp to `ratio` over the next chunk; fails outside the built range
    fn set_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        match self {
            Self::Sinc(r) => r.set_resample_ratio(ratio, true),
            Self::Poly(r) => r.set_resample_ratio(ratio, true),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Sinc(r) => r.reset(),
            Self::Poly(r) => r.reset(),
        }
    }
}

/// Windowed-sinc or polynomial resampler backed by rubato
pub struct SincResampler {
    engine: Engine,
    quality: ResamplerQuality,
    format: AudioFormat,
    map: OutputMap,
    in_rate: u32,
    out_rate: u32,
    /// Planar input waiting for a full chunk
    gather: Vec<Vec<f32>>,
    gathered: usize,
    /// Planar output not yet accumulated
    fifo: Vec<Vec<f32>>,
    fifo_pos: usize,
    fifo_len: usize,
    /// Engine has processed a chunk since it was built or reset
    primed: bool,
}

impl SincResampler {
    pub fn new(
        format: AudioFormat,
        in_channels: usize,
        out_channels: usize,
        out_rate: u32,
        quality: ResamplerQuality,
    ) -> Result<Self, ResamplerConstructionError> {
        let in_channels = in_channels.clamp(1, MAX_NUM_CHANNELS);
        let engine = Engine::build(quality, 1.0, in_channels)?;
        let mut r = Self {
            engine,
            quality,
            format,
            map: OutputMap::new(in_channels, out_channels.clamp(1, MAX_NUM_CHANNELS)),
            in_rate: out_rate,
            out_rate,
            gather: Vec::new(),
            gathered: 0,
            fifo: Vec::new(),
            fifo_pos: 0,
            fifo_len: 0,
            primed: false,
        };
        r.allocate();
        Ok(r)
    }

    fn allocate(&mut self) {
        let ch = self.map.in_channels;
        self.gather = vec![vec![0.0; self.engine.input_frames_max()]; ch];
        self.fifo = vec![vec![0.0; self.engine.output_frames_max()]; ch];
        self.gathered = 0;
        self.fifo_pos = 0;
        self.fifo_len = 0;
    }

    /// Swap in a rebuilt engine, keeping gathered input and pending output
    fn replace_engine(&mut self, engine: Engine) {
        let pending = self.fifo_len - self.fifo_pos;
        let in_len = engine.input_frames_max().max(self.gathered);
        let out_len = engine.output_frames_max().max(pending);
        for g in &mut self.gather {
            g.resize(in_len, 0.0);
        }
        for f in &mut self.fifo {
            f.copy_within(self.fifo_pos..self.fifo_len, 0);
            f.resize(out_len, 0.0);
        }
        self.fifo_pos = 0;
        self.fifo_len = pending;
        self.engine = engine;
        self.primed = false;
    }

    /// Fill `gather` up to the engine's next chunk size
    ///
    /// Returns false when the provider ran dry first, or handed out fewer
    /// bytes than the frames it announced.
    fn gather_chunk(&mut self, provider: &mut dyn BufferProvider) -> bool {
        let need = self.engine.input_frames_next();
        let ch = self.map.in_channels;
        let ss = self.format.bytes_per_sample();
        while self.gathered < need {
            let Some(n) = provider.get_next_buffer(need - self.gathered) else {
                return false;
            };
            let n = n.min(need - self.gathered);
            let copied = match provider.buffer().get(..n * ch * ss) {
                Some(bytes) => {
                    for (f, frame) in bytes.chunks_exact(ch * ss).enumerate() {
                        for (c, sample) in frame.chunks_exact(ss).enumerate() {
                            self.gather[c][self.gathered + f] = sample_to_f32(self.format, sample);
                        }
                    }
                    true
                }
                None => false,
            };
            if !copied {
                log::error!("gather_chunk: short input buffer, {} frames announced", n);
                provider.release_buffer(0);
                return false;
            }
            provider.release_buffer(n);
            self.gathered += n;
        }
        true
    }
}

impl Resampler for SincResampler {
    fn set_sample_rate(&mut self, in_rate: u32) {
        if in_rate == self.in_rate || in_rate == 0 {
            return;
        }
        self.in_rate = in_rate;
        let ratio = self.out_rate as f64 / in_rate as f64;
        if self.primed && self.engine.set_ratio(ratio).is_ok() {
            return;
        }
        match Engine::build(self.quality, ratio, self.map.in_channels) {
            Ok(engine) => self.replace_engine(engine),
            Err(e) => log::error!("set_sample_rate: cannot resample {} -> {}: {}", in_rate, self.out_rate, e),
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
        let mut produced = 0;
        while produced < frames {
            if self.fifo_pos == self.fifo_len {
                if !self.gather_chunk(provider) {
                    break;
                }
                match self.engine.process(&self.gather, &mut self.fifo) {
                    Ok((used, n)) => {
                        let used = used.min(self.gathered);
                        for g in &mut self.gather {
                            g.copy_within(used..self.gathered, 0);
                        }
                        self.gathered -= used;
                        self.fifo_len = n;
                        self.fifo_pos = 0;
                        self.primed = true;
                    }
                    Err(e) => {
                        log::error!("resample: {}", e);
                        self.gathered = 0;
                        break;
                    }
                }
                continue;
            }
            let n = (self.fifo_len - self.fifo_pos).min(frames - produced);
            let fifo = &self.fifo;
            for i in 0..n {
                let pos = self.fifo_pos + i;
                self.map.accumulate(&mut out, produced + i, |c| fifo[c][pos]);
            }
            self.fifo_pos += n;
            produced += n;
        }
        produced
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.primed = false;
        self.gathered = 0;
        self.fifo_pos = 0;
        self.fifo_len = 0;
    }

    fn unreleased_frames(&self) -> usize {
        self.gathered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;

    #[test]
    fn test_produces_requested_frames() {
        let mut r = SincResampler::new(AudioFormat::PcmFloat, 2, 2, 48_000, ResamplerQuality::High)
            .expect("sinc resampler");
        r.set_sample_rate(44_100);
        let mut provider = FakeProvider::from_f32(&vec![0.25; 2 * 4096], 2);
        let mut acc = vec![0.0f32; 2 * 256];
        assert_eq!(r.resample(AccumMut::Float(&mut acc), 256, &mut provider), 256);
    }

    #[test]
    fn test_split_calls_match_single_call() {
        let input: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();

        let mut whole = SincResampler::new(AudioFormat::PcmFloat, 1, 2, 48_000, ResamplerQuality::Medium)
            .expect("poly resampler");
        whole.set_sample_rate(32_000);
        let mut provider = FakeProvider::from_f32(&input, 1);
        let mut expected = vec![0.0f32; 2 * 512];
        whole.resample(AccumMut::Float(&mut expected), 512, &mut provider);

        let mut split = SincResampler::new(AudioFormat::PcmFloat, 1, 2, 48_000, ResamplerQuality::Medium)
            .expect("poly resampler");
        split.set_sample_rate(32_000);
        let mut provider = FakeProvider::from_f32(&input, 1).with_chunk(13);
        let mut actual = vec![0.0f32; 2 * 512];
        for call in 0..4 {
            split.resample(AccumMut::Float(&mut actual[call * 256..(call + 1) * 256]), 128, &mut provider);
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_dry_provider_keeps_gathered_input() {
        let mut r = SincResampler::new(AudioFormat::Pcm16Bit, 1, 2, 48_000, ResamplerQuality::DynLow)
            .expect("sinc resampler");
        r.set_sample_rate(8_000);
        let mut provider = FakeProvider::constant_i16(1000, 1, 3);
        let mut acc = vec![0i32; 2 * 16];
        assert_eq!(r.resample(AccumMut::Fixed(&mut acc), 16, &mut provider), 0);
        assert_eq!(r.unreleased_frames(), 3);
        r.reset();
        assert_eq!(r.unreleased_frames(), 0);
    }

    /// One input chunk, then dry
    fn one_chunk_resampler(quality: ResamplerQuality) -> (SincResampler, FakeProvider) {
        let mut r = SincResampler::new(AudioFormat::PcmFloat, 2, 2, 48_000, quality).expect("sinc resampler");
        r.set_sample_rate(44_100);
        let need = r.engine.input_frames_next();
        let provider = FakeProvider::from_f32(&vec![0.5; 2 * need], 2);
        (r, provider)
    }

    #[test]
    fn test_small_rate_change_keeps_pending_output() {
        let (mut r, mut provider) = one_chunk_resampler(ResamplerQuality::High);
        let mut acc = vec![0.0f32; 2 * 64];
        assert_eq!(r.resample(AccumMut::Float(&mut acc[..20]), 10, &mut provider), 10);
        let pending = r.fifo_len - r.fifo_pos;
        assert!(pending > 0);

        r.set_sample_rate(44_000);
        assert_eq!(r.sample_rate(), 44_000);
        assert_eq!(r.resample(AccumMut::Float(&mut acc), pending, &mut provider), pending);
        assert_eq!(r.resample(AccumMut::Float(&mut acc), 1, &mut provider), 0);
    }

    #[test]
    fn test_large_rate_change_carries_buffered_frames() {
        let (mut r, mut provider) = one_chunk_resampler(ResamplerQuality::Medium);
        let mut acc = vec![0.0f32; 2 * 64];
        assert_eq!(r.resample(AccumMut::Float(&mut acc[..20]), 10, &mut provider), 10);
        let pending = r.fifo_len - r.fifo_pos;

        // Far outside the glide range: the engine is rebuilt
        r.set_sample_rate(8_000);
        assert_eq!(r.resample(AccumMut::Float(&mut acc), pending, &mut provider), pending);

        let mut r = SincResampler::new(AudioFormat::Pcm16Bit, 1, 2, 48_000, ResamplerQuality::DynLow)
            .expect("sinc resampler");
        r.set_sample_rate(8_000);
        let mut provider = FakeProvider::constant_i16(1000, 1, 3);
        let mut acc = vec![0i32; 2 * 16];
        r.resample(AccumMut::Fixed(&mut acc), 16, &mut provider);
        r.set_sample_rate(16_000);
        assert_eq!(r.unreleased_frames(), 3);
    }

    /// Announces frames it does not hold
    struct ShortProvider {
        releases: usize,
    }

    impl BufferProvider for ShortProvider {
        fn get_next_buffer(&mut self, frames: usize) -> Option<usize> {
            Some(frames)
        }

        fn buffer(&self) -> &[u8] {
            &[0, 0]
        }

        fn release_buffer(&mut self, frames: usize) {
            assert_eq!(frames, 0);
            self.releases += 1;
        }
    }

    #[test]
    fn test_short_buffer_counts_as_exhaustion() {
        let mut r = SincResampler::new(AudioFormat::Pcm16Bit, 2, 2, 48_000, ResamplerQuality::High)
            .expect("sinc resampler");
        r.set_sample_rate(44_100);
        let mut provider = ShortProvider { releases: 0 };
        let mut acc = vec![0i32; 2 * 16];
        assert_eq!(r.resample(AccumMut::Fixed(&mut acc), 16, &mut provider), 0);
        assert_eq!(provider.releases, 1);
        assert_eq!(r.unreleased_frames(), 0);
    }
}
