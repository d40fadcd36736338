//! Engine settings persistence
//!
//! Handles saving and loading the playback core's tunables. Equalizer gains
//! are not stored here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Playback order used when a track ends or next/previous is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    /// Play in order, stop at end
    #[default]
    Sequential,
    /// Play in order, loop back to start
    LoopAll,
    /// Repeat current song
    LoopOne,
    /// Random order
    Shuffle,
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl PlayMode {
    /// Get the next play mode in cycle order
    pub fn next(self) -> Self {
        match self {
            PlayMode::Sequential => PlayMode::LoopAll,
            PlayMode::LoopAll => PlayMode::LoopOne,
            PlayMode::LoopOne => PlayMode::Shuffle,
            PlayMode::Shuffle => PlayMode::Sequential,
        }
    }

    /// Get display name for the mode
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayMode::Sequential => "Sequential",
            PlayMode::LoopAll => "Repeat All",
            PlayMode::LoopOne => "Repeat One",
            PlayMode::Shuffle => "Shuffle",
        }
    }
}

/// Tunables for the playback core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Progress publication interval in milliseconds
    pub progress_tick_ms: u64,
    /// Peak marker decay interval in milliseconds
    pub peak_decay_tick_ms: u64,
    /// Amount subtracted from every peak marker per decay tick
    pub peak_decay_step: f32,
    /// Multiplier applied to per-bin RMS before clamping to [0, 1]
    pub spectrum_gain: f32,
    /// Frames per analyzer tap callback
    pub tap_buffer_frames: usize,
    /// Initial volume (0.0 to 1.0)
    pub volume: f32,
    /// Initial balance (-1.0 = left, 1.0 = right)
    pub balance: f32,
    /// Play mode used when a track finishes
    pub play_mode: PlayMode,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            progress_tick_ms: 100,
            peak_decay_tick_ms: 300,
            peak_decay_step: 0.05,
            spectrum_gain: 2.0,
            tap_buffer_frames: 1024,
            volume: 0.5,
            balance: 0.0,
            play_mode: PlayMode::Sequential,
            output_device: None,
        }
    }
}

impl EngineSettings {
    /// Default settings file location
    pub fn file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tunes", "Tunes")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load settings from the default file, falling back to defaults
    pub fn load() -> Self {
        Self::file_path()
            .and_then(|path| match Self::load_from_file(&path) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::debug!("Using default settings ({}): {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default()
            .sanitized()
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Save settings to the default file
    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(path) = Self::file_path() {
            self.save_to_file(&path)
        } else {
            Err(SettingsError::Io(
                "Could not determine config directory".to_string(),
            ))
        }
    }

    /// Save settings to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))?;
        Ok(())
    }

    /// Clamp every value into a range the engine can work with
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        self.progress_tick_ms = self.progress_tick_ms.max(1);
        self.peak_decay_tick_ms = self.peak_decay_tick_ms.max(1);
        self.peak_decay_step = if self.peak_decay_step.is_finite() {
            self.peak_decay_step.clamp(0.0, 1.0)
        } else {
            defaults.peak_decay_step
        };
        if !(self.spectrum_gain.is_finite() && self.spectrum_gain > 0.0) {
            self.spectrum_gain = defaults.spectrum_gain;
        }
        self.tap_buffer_frames = self.tap_buffer_frames.max(crate::audio::SPECTRUM_BINS);
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            defaults.volume
        };
        self.balance = if self.balance.is_finite() {
            self.balance.clamp(-1.0, 1.0)
        } else {
            defaults.balance
        };
        self
    }
}

/// Errors that can occur with settings
#[derive(Debug, Clone)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tunables() {
        let settings = EngineSettings::default();
        assert_eq!(settings.progress_tick_ms, 100);
        assert_eq!(settings.peak_decay_tick_ms, 300);
        assert_eq!(settings.peak_decay_step, 0.05);
        assert_eq!(settings.spectrum_gain, 2.0);
        assert_eq!(settings.tap_buffer_frames, 1024);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = EngineSettings {
            volume: 0.8,
            play_mode: PlayMode::Shuffle,
            output_device: Some("hw:0,0".to_string()),
            ..Default::default()
        };
        settings.save_to_file(&path).unwrap();

        let loaded = EngineSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.volume, 0.8);
        assert_eq!(loaded.play_mode, PlayMode::Shuffle);
        assert_eq!(loaded.output_device.as_deref(), Some("hw:0,0"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let loaded: EngineSettings = serde_json::from_str(r#"{ "volume": 0.25 }"#).unwrap();
        assert_eq!(loaded.volume, 0.25);
        assert_eq!(loaded.progress_tick_ms, 100);
        assert_eq!(loaded.play_mode, PlayMode::Sequential);
    }

    #[test]
    fn test_load_from_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            EngineSettings::load_from_file(&path),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_sanitized_clamps() {
        let settings = EngineSettings {
            progress_tick_ms: 0,
            tap_buffer_frames: 4,
            volume: 3.0,
            balance: -9.0,
            spectrum_gain: -1.0,
            peak_decay_step: f32::NAN,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(settings.progress_tick_ms, 1);
        assert_eq!(settings.tap_buffer_frames, 20);
        assert_eq!(settings.volume, 1.0);
        assert_eq!(settings.balance, -1.0);
        assert_eq!(settings.spectrum_gain, 2.0);
        assert_eq!(settings.peak_decay_step, 0.05);
    }

    #[test]
    fn test_play_mode_cycle() {
        let mut mode = PlayMode::Sequential;
        for _ in 0..4 {
            mode = mode.next();
        }
        assert_eq!(mode, PlayMode::Sequential);
        assert_eq!(PlayMode::LoopOne.to_string(), "Repeat One");
    }
}
