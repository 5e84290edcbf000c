//! Engine configuration
//!
//! Named key/value overrides for the panning engine and mixer defaults,
//! loadable from a YAML file. Every key is optional; a missing key falls
//! back to the hardcoded layout tables and constants.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{Resampler, SpeakerLayout, DEFAULT_HEAD_DAMPEN, MAX_SENDS};

/// Tunables consumed by [`crate::Device`] and the panning engine.
///
/// Layout override strings list `speaker=angle_degrees` pairs separated by
/// commas, e.g. `"fl=-45, fr=45"`. Speakers keep their default angle when
/// not named; angles outside `[-180, 180]` are ignored with a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Speaker angle overrides for the stereo layout
    pub layout_stereo: Option<String>,
    /// Speaker angle overrides for the quad layout
    pub layout_quad: Option<String>,
    /// Speaker angle overrides for the 5.1 layout
    pub layout_51chn: Option<String>,
    /// Speaker angle overrides for the 6.1 layout
    pub layout_61chn: Option<String>,
    /// Speaker angle overrides for the 7.1 layout
    pub layout_71chn: Option<String>,
    /// High-frequency dampening for sources behind the listener, `[0, 1]`.
    /// Only applied on mono and stereo devices.
    pub head_dampen: f32,
    /// Stereo crossfeed strength for headphone listening: 0 disables,
    /// 1..=3 select increasingly strong presets.
    pub crossfeed_level: u8,
    /// Cap on the number of auxiliary sends per source
    pub sends: usize,
    /// Default interpolation kernel for new sources
    pub resampler: Resampler,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout_stereo: None,
            layout_quad: None,
            layout_51chn: None,
            layout_61chn: None,
            layout_71chn: None,
            head_dampen: DEFAULT_HEAD_DAMPEN,
            crossfeed_level: 0,
            sends: MAX_SENDS,
            resampler: Resampler::default(),
        }
    }
}

impl EngineConfig {
    /// Layout override string for the given speaker layout, if configured
    pub fn layout_override(&self, layout: SpeakerLayout) -> Option<&str> {
        let value = match layout {
            SpeakerLayout::Mono => &None,
            SpeakerLayout::Stereo => &self.layout_stereo,
            SpeakerLayout::Quad => &self.layout_quad,
            SpeakerLayout::Surround51 => &self.layout_51chn,
            SpeakerLayout::Surround61 => &self.layout_61chn,
            SpeakerLayout::Surround71 => &self.layout_71chn,
        };
        value.as_deref()
    }
}

/// Load a configuration from a YAML file.
///
/// Returns the default when the file is missing or malformed; a malformed
/// file is logged as a warning rather than surfaced as an error so that a
/// bad config never prevents the engine from starting.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::debug!("load_config: {:?} does not exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save a configuration to a YAML file, creating parent directories.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.head_dampen, DEFAULT_HEAD_DAMPEN);
        assert_eq!(config.sends, MAX_SENDS);
        assert_eq!(config.crossfeed_level, 0);
        assert_eq!(config.resampler, Resampler::Linear);
        assert!(config.layout_override(SpeakerLayout::Stereo).is_none());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/soundfield.yaml"));
        assert_eq!(config.sends, MAX_SENDS);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soundfield.yaml");

        let mut config = EngineConfig::default();
        config.layout_stereo = Some("fl=-60, fr=60".to_string());
        config.crossfeed_level = 2;
        config.resampler = Resampler::Cosine;

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);

        assert_eq!(loaded.layout_stereo.as_deref(), Some("fl=-60, fr=60"));
        assert_eq!(loaded.crossfeed_level, 2);
        assert_eq!(loaded.resampler, Resampler::Cosine);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.yaml");
        std::fs::write(&path, "head_dampen: 0.5\n").unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded.head_dampen, 0.5);
        assert_eq!(loaded.sends, MAX_SENDS);
    }
}
