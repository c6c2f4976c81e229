//! YAML configuration I/O
//!
//! Loading never fails: a missing or malformed file yields the type's default
//! so a mixer can always be brought up. Saving reports errors with context.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config.
/// If the file exists but is invalid, logs a warning and returns default config.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using defaults", e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("load_config: Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("load_config: Failed to parse config: {}, using defaults", e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;
    use crate::resampler::ResamplerQuality;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: MixerConfig = load_config(Path::new("/nonexistent/path/mixer.yaml"));
        assert_eq!(config, MixerConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mixer.yaml");

        let config = MixerConfig {
            frame_count: 480,
            sample_rate: 44_100,
            float_mixer: false,
            resampler_quality: Some(ResamplerQuality::Medium),
            ..MixerConfig::default()
        };

        save_config(&config, &path).unwrap();
        let loaded: MixerConfig = load_config(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixer.yaml");
        std::fs::write(&path, "frame_count: [not, a, number]").unwrap();

        let loaded: MixerConfig = load_config(&path);
        assert_eq!(loaded, MixerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixer.yaml");
        std::fs::write(&path, "sample_rate: 96000\n").unwrap();

        let loaded: MixerConfig = load_config(&path);
        assert_eq!(loaded.sample_rate, 96_000);
        assert_eq!(loaded.frame_count, MixerConfig::default().frame_count);
    }
}
