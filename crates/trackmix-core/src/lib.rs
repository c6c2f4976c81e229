//! Trackmix Core - multi-track PCM mixing engine
//!
//! Mixes up to 32 independent PCM tracks into shared output buffers, applying
//! per-track gain ramps, aux sends, channel conversion, resampling and
//! time-stretching on the way.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod provider;
pub mod resampler;
pub mod types;
pub mod volume;

pub use buffer::{AuxBufferId, BufferId};
pub use config::MixerConfig;
pub use engine::{Mixer, Param, Target};
pub use error::{MixerError, MixerResult};
pub use provider::BufferProvider;
pub use types::*;
