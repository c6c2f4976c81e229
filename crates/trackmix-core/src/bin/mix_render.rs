//! mix-render - mix WAV files offline through the trackmix engine
//!
//! Every input becomes one track feeding a shared 16-bit stereo output at the
//! device rate. Inputs at other rates are resampled, layouts other than
//! stereo are downmixed or expanded.
//!
//! ## Usage
//!
//! ```text
//! mix-render [--config mixer.yaml] [--rate 48000] -o out.wav a.wav b.wav:0.5
//! ```
//!
//! A `:gain` suffix sets the linear gain of that input (default 1.0).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use trackmix_core::{
    AudioFormat, BufferProvider, ChannelMask, Mixer, MixerConfig, Param, Target,
};

/// Decoded WAV samples, kept typed so the served bytes stay aligned
enum Samples {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

/// Serves a decoded file front to back
struct WavProvider {
    samples: Samples,
    channels: usize,
    pos: usize,
    held: usize,
}

impl WavProvider {
    fn frames(&self) -> usize {
        let len = match &self.samples {
            Samples::I16(s) => s.len(),
            Samples::F32(s) => s.len(),
        };
        len / self.channels
    }

    fn format(&self) -> AudioFormat {
        match self.samples {
            Samples::I16(_) => AudioFormat::Pcm16Bit,
            Samples::F32(_) => AudioFormat::PcmFloat,
        }
    }
}

impl BufferProvider for WavProvider {
    fn get_next_buffer(&mut self, frames: usize) -> Option<usize> {
        let n = frames.min(self.frames().saturating_sub(self.pos));
        self.held = n;
        (n > 0).then_some(n)
    }

    fn buffer(&self) -> &[u8] {
        let range = self.pos * self.channels..(self.pos + self.held) * self.channels;
        match &self.samples {
            Samples::I16(s) => bytemuck::cast_slice(&s[range]),
            Samples::F32(s) => bytemuck::cast_slice(&s[range]),
        }
    }

    fn release_buffer(&mut self, frames: usize) {
        self.pos += frames.min(self.held);
        self.held = 0;
    }
}

struct Input {
    path: PathBuf,
    gain: f32,
}

struct Args {
    config: Option<PathBuf>,
    rate: Option<u32>,
    output: PathBuf,
    inputs: Vec<Input>,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut rate = None;
    let mut output = None;
    let mut inputs = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--rate" => {
                let value = args.next().context("--rate needs a value")?;
                rate = Some(value.parse().with_context(|| format!("Invalid rate: {}", value))?);
            }
            "-o" | "--output" => output = Some(PathBuf::from(args.next().context("-o needs a path")?)),
            _ => {
                let (path, gain) = match arg.rsplit_once(':') {
                    Some((path, gain)) => (
                        path,
                        gain.parse().with_context(|| format!("Invalid gain in {}", arg))?,
                    ),
                    None => (arg.as_str(), 1.0),
                };
                inputs.push(Input {
                    path: PathBuf::from(path),
                    gain,
                });
            }
        }
    }

    let Some(output) = output else {
        bail!("usage: mix-render [--config FILE] [--rate HZ] -o OUT.wav IN.wav[:GAIN]...");
    };
    if inputs.is_empty() {
        bail!("No input files given");
    }
    Ok(Args {
        config,
        rate,
        output,
        inputs,
    })
}

/// Decode a WAV file; anything but 16-bit integer is served as float
fn read_wav(path: &Path) -> Result<(WavProvider, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        bail!("{:?}: {} Hz, {} channels is not playable", path, spec.sample_rate, spec.channels);
    }
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => Samples::I16(
            reader
                .samples::<i16>()
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode {:?}", path))?,
        ),
        (hound::SampleFormat::Int, bits) => {
            let scale = 1.0 / (1u64 << (bits - 1)) as f32;
            Samples::F32(
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 * scale))
                    .collect::<Result<_, _>>()
                    .with_context(|| format!("Failed to decode {:?}", path))?,
            )
        }
        (hound::SampleFormat::Float, _) => Samples::F32(
            reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode {:?}", path))?,
        ),
    };
    let provider = WavProvider {
        samples,
        channels: spec.channels as usize,
        pos: 0,
        held: 0,
    };
    Ok((provider, spec.sample_rate))
}

fn channel_mask(channels: usize) -> ChannelMask {
    match channels {
        1 => ChannelMask::MONO,
        2 => ChannelMask::STEREO,
        4 => ChannelMask::QUAD,
        6 => ChannelMask::SURROUND_5_1,
        8 => ChannelMask::SURROUND_7_1,
        n => ChannelMask::index_of_count(n),
    }
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for hook selection details
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let mut config: MixerConfig = match &args.config {
        Some(path) => MixerConfig::load(path),
        None => MixerConfig::default(),
    };
    if let Some(rate) = args.rate {
        config.sample_rate = rate;
    }
    let frame_count = config.frame_count;
    let sample_rate = config.sample_rate;

    let mut mixer = Mixer::new(config).context("Invalid mixer configuration")?;
    let out = mixer.create_main_buffer();

    // Output length in device frames: the longest input after resampling
    let mut total_frames = 0usize;
    for input in &args.inputs {
        let (provider, rate) = read_wav(&input.path)?;
        let frames = (provider.frames() as u64 * sample_rate as u64).div_ceil(rate as u64) as usize;
        total_frames = total_frames.max(frames);

        let name = mixer
            .get_track_name(channel_mask(provider.channels), provider.format(), 0)
            .with_context(|| format!("Cannot mix {:?}", input.path))?;
        mixer.set_parameter(name, Target::Track, Param::MainBuffer(Some(out)))?;
        mixer.set_parameter(name, Target::Resample, Param::SampleRate(rate))?;
        for channel in 0..2 {
            mixer.set_parameter(name, Target::Volume, Param::Volume(channel, input.gain))?;
        }
        log::info!(
            "{:?}: {} channels, {} Hz, {} frames -> {}",
            input.path,
            provider.channels,
            rate,
            provider.frames(),
            name
        );
        mixer.set_buffer_provider(name, Some(Box::new(provider)))?;
        mixer.enable(name)?;
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("Failed to create {:?}", args.output))?;

    let mut written = 0;
    while written < total_frames {
        mixer.process();
        let frames = frame_count.min(total_frames - written);
        for &sample in &mixer.main_buffer_i16(out)?[..frames * 2] {
            writer.write_sample(sample)?;
        }
        written += frames;
    }
    writer.finalize().context("Failed to finalize output")?;

    log::info!(
        "Wrote {} frames at {} Hz from {} inputs to {:?}",
        written,
        sample_rate,
        args.inputs.len(),
        args.output
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Canonical 16-bit PCM header with an empty data chunk
    fn wav_header(sample_rate: u32, channels: u16) -> Vec<u8> {
        let block_align = channels * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_read_wav_rejects_zero_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.wav");
        std::fs::write(&path, wav_header(0, 2)).unwrap();
        assert!(read_wav(&path).is_err());
    }

    #[test]
    fn test_read_wav_serves_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for sample in [100i16, -100, 200, -200] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let (mut provider, rate) = read_wav(&path).unwrap();
        assert_eq!(rate, 44_100);
        assert_eq!(provider.format(), AudioFormat::Pcm16Bit);
        assert_eq!(provider.frames(), 2);
        assert_eq!(provider.get_next_buffer(8), Some(2));
        assert_eq!(bytemuck::cast_slice::<u8, i16>(provider.buffer()), &[100, -100, 200, -200]);
    }
}
