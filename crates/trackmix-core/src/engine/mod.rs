//! Mixing engine - tracks, hooks, kernels and the mixer itself
//!
//! - Track: per-stream state, adapter chain policy and resampler lifecycle
//! - Hooks: needs derivation and strategy selection
//! - Kernels: volume-applying inner loops, monomorphized per channel count
//! - Mixer: the public API tying everything together

mod hooks;
mod kernels;
mod mixer;
mod track;

pub use hooks::{ChannelClass, Needs, ProcessHook, TrackHook, TrackType};
pub use mixer::*;
