//! Mixer configuration
//!
//! - [`MixerConfig`]: frame count, device rate, pool size and processing knobs
//! - Generic YAML load/save helpers
//!
//! # Usage
//!
//! ```ignore
//! use trackmix_core::config::{load_config, save_config, MixerConfig};
//!
//! let config: MixerConfig = load_config(&config_path);
//! save_config(&config, &config_path)?;
//! ```

mod io;
mod mixer;

pub use io::{load_config, save_config};
pub use mixer::MixerConfig;
