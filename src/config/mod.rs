//! Configuration file support for capturecast.
//!
//! Settings are read from `~/.config/capturecast/config.toml` (or a path given
//! on the command line). A missing file means defaults.

pub mod types;

pub use types::{CaptureConfig, FileConfig, NotificationsConfig, RecordingConfig, UploadConfig};

use anyhow::{Context, Result};
use log::{debug, info};
use schemars::{JsonSchema, Schema};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::capture::{RecordingOptions, file::FileSinkConfig, file::expand_tilde};

const MIN_DIMENSION: u32 = 16;
const MAX_DIMENSION: u32 = 8192;

/// Main configuration structure containing all user settings.
///
/// # Example TOML
/// ```toml
/// [capture]
/// sinks = ["clipboard", "file", "upload"]
///
/// [file]
/// save_directory = "~/Pictures/Capturecast"
///
/// [upload]
/// command = ["curl", "-sF", "file=@-", "https://0x0.st"]
///
/// [recording]
/// frame_rate = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub file: FileConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Validates and clamps all configuration values to acceptable ranges.
    ///
    /// Invalid values are replaced and a warning is logged.
    fn validate_and_clamp(&mut self) {
        for (name, value) in [
            ("width", &mut self.capture.width),
            ("height", &mut self.capture.height),
        ] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&*value) {
                log::warn!(
                    "Invalid capture {} {}, clamping to {}-{} range",
                    name,
                    value,
                    MIN_DIMENSION,
                    MAX_DIMENSION
                );
                *value = (*value).clamp(MIN_DIMENSION, MAX_DIMENSION);
            }
        }

        let before = self.capture.sinks.len();
        self.capture.sinks.retain(|id| !id.trim().is_empty());
        if self.capture.sinks.len() != before {
            log::warn!("Ignoring empty sink ids in capture.sinks");
        }
        if self.capture.sinks.is_empty() {
            log::warn!("No sinks configured, falling back to clipboard and file");
            self.capture.sinks = types::default_sinks();
        }

        if self.file.save_directory.trim().is_empty() {
            log::warn!("Empty save_directory, falling back to default");
            self.file.save_directory = types::default_save_directory();
        }

        if self.file.filename_template.trim().is_empty() {
            log::warn!("Empty filename_template, falling back to default");
            self.file.filename_template = types::default_filename_template();
        }

        if !(1..=120).contains(&self.recording.frame_rate) {
            log::warn!(
                "Invalid frame_rate {}, clamping to 1-120 range",
                self.recording.frame_rate
            );
            self.recording.frame_rate = self.recording.frame_rate.clamp(1, 120);
        }

        if self.recording.max_duration_secs == Some(0) {
            log::warn!("max_duration_secs = 0 disables the limit");
            self.recording.max_duration_secs = None;
        }
    }

    /// Returns the path to the configuration file.
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined (e.g., HOME not set).
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("capturecast");

        Ok(config_dir.join("config.toml"))
    }

    /// Loads configuration from the default path, or returns defaults if not found.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Loads configuration from `config_path`, or returns defaults if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or contains invalid TOML.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("Config file not found, using defaults");
            debug!("Expected config at: {}", config_path.display());
            return Ok(Self::default());
        }

        let config_str = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config from {}", config_path.display()))?;

        config.validate_and_clamp();

        info!("Loaded config from {}", config_path.display());
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// JSON schema describing the configuration file.
    pub fn json_schema() -> Schema {
        schemars::schema_for!(Config)
    }

    pub fn file_sink_config(&self) -> FileSinkConfig {
        FileSinkConfig {
            save_directory: expand_tilde(&self.file.save_directory),
            filename_template: self.file.filename_template.clone(),
        }
    }

    /// Upload command, when one is configured.
    pub fn upload_command(&self) -> Option<Vec<String>> {
        (!self.upload.command.is_empty()).then(|| self.upload.command.clone())
    }

    pub fn recording_options(&self) -> RecordingOptions {
        RecordingOptions::with_frame_rate(self.recording.frame_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.capture.sinks, ["clipboard", "file"]);
        assert_eq!(config.recording.frame_rate, 30);
        assert!(config.notifications.enabled);
        assert!(config.upload_command().is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[capture]
sinks = ["file", "upload"]

[upload]
command = ["uploader", "--quiet"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.capture.sinks, ["file", "upload"]);
        assert_eq!(config.capture.width, 1280);
        assert_eq!(
            config.upload_command(),
            Some(vec!["uploader".to_string(), "--quiet".to_string()])
        );
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut config = Config::default();
        config.capture.width = 4;
        config.capture.height = 100_000;
        config.capture.sinks = vec![" ".into()];
        config.recording.frame_rate = 500;
        config.recording.max_duration_secs = Some(0);
        config.file.filename_template = String::new();

        config.validate_and_clamp();

        assert_eq!(config.capture.width, MIN_DIMENSION);
        assert_eq!(config.capture.height, MAX_DIMENSION);
        assert_eq!(config.capture.sinks, ["clipboard", "file"]);
        assert_eq!(config.recording.frame_rate, 120);
        assert_eq!(config.recording.max_duration_secs, None);
        assert!(!config.file.filename_template.is_empty());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[capture\nsinks = 3").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn derived_settings_follow_config() {
        let mut config = Config::default();
        config.file.save_directory = "/srv/captures".into();
        config.recording.frame_rate = 20;

        assert_eq!(
            config.file_sink_config().save_directory,
            PathBuf::from("/srv/captures")
        );
        assert_eq!(
            config.recording_options().frame_interval,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn schema_lists_sections() {
        let schema = serde_json::to_value(Config::json_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        for section in ["capture", "file", "upload", "recording", "notifications"] {
            assert!(properties.contains_key(section), "missing {section}");
        }
    }
}
