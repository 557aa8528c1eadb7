//! Configuration management for the splitter
//!
//! Persisted user settings (device selection per channel, startup toggle)
//! and the engine options used when a secondary engine is allocated. Both
//! live in one JSON file; a missing or malformed file falls back to
//! defaults so the host always starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::devices::OutputDeviceInfo;

/// Complete splitter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitterConfig {
    #[serde(default)]
    pub settings: SplitterSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    /// Filter passed to the tracing subscriber (`info`, `audio_splitter=debug`, ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            settings: SplitterSettings::default(),
            engine: EngineSettings::default(),
            log_level: default_log_level(),
        }
    }
}

/// User-facing settings, opaque to the mirroring core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitterSettings {
    /// Output device of the primary engine
    #[serde(default = "OutputDeviceInfo::default_device")]
    pub audio_output_device: OutputDeviceInfo,
    #[serde(default = "OutputDeviceInfo::default_device")]
    pub sfx_output_device: OutputDeviceInfo,
    /// Output device of the mirrored music engine
    #[serde(default = "OutputDeviceInfo::default_device")]
    pub music_output_device: OutputDeviceInfo,
    /// Turn mirroring on as soon as content is loaded
    #[serde(default)]
    pub enable_on_startup: bool,
}

/// Options for allocating and feeding a secondary engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Virtual channel count passed to engine initialization
    #[serde(default = "default_max_channels")]
    pub max_channels: u32,
    /// Game content root; banks live under `FMOD/Desktop`
    #[serde(default)]
    pub content_dir: PathBuf,
    /// Bank name -> bank file for mod-supplied banks
    #[serde(default)]
    pub mod_banks: HashMap<String, PathBuf>,
    /// Evict unused descriptions from secondary engines alongside the primary
    #[serde(default)]
    pub unload_unused_audio: bool,
}

fn default_max_channels() -> u32 {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            content_dir: PathBuf::from("Content"),
            mod_banks: HashMap::new(),
            unload_unused_audio: false,
        }
    }
}

impl SplitterConfig {
    /// Load configuration from JSON file
    ///
    /// # Returns
    /// Loaded configuration, or defaults if the file doesn't exist or the
    /// JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Persist configuration as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        log::info!("[Config] Saved configuration to {:?}", path.as_ref());
        Ok(())
    }
}
