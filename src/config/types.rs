//! Configuration type definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What to capture and where it goes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CaptureConfig {
    /// Sink ids to deliver every capture to, in order (e.g. `["clipboard", "file"]`).
    /// Memory-backed sinks such as the clipboard receive the encoder output directly.
    #[serde(default = "default_sinks")]
    pub sinks: Vec<String>,

    /// Width of the captured region in pixels (valid range: 16 - 8192)
    #[serde(default = "default_width")]
    pub width: u32,

    /// Height of the captured region in pixels (valid range: 16 - 8192)
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sinks: default_sinks(),
            width: default_width(),
            height: default_height(),
        }
    }
}

/// File sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileConfig {
    /// Directory captures are saved to; `~/` is expanded
    #[serde(default = "default_save_directory")]
    pub save_directory: String,

    /// Filename template using chrono format specifiers; the extension is added automatically
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            save_directory: default_save_directory(),
            filename_template: default_filename_template(),
        }
    }
}

/// Upload sink settings.
///
/// The command receives the capture on stdin and must print the resulting URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UploadConfig {
    /// Program and arguments, e.g. `["curl", "-sF", "file=@-", "https://0x0.st"]`.
    /// The upload sink is disabled while this is empty.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Continuous recording settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordingConfig {
    /// Target frames per second (valid range: 1 - 120)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Stop automatically after this many seconds (unset = until interrupted)
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            max_duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationsConfig {
    /// Show a desktop notification after each capture or recording
    #[serde(default = "default_notifications_enabled")]
    pub enabled: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: default_notifications_enabled(),
        }
    }
}

pub(super) fn default_sinks() -> Vec<String> {
    vec!["clipboard".to_string(), "file".to_string()]
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

pub(super) fn default_save_directory() -> String {
    "~/Pictures/Capturecast".to_string()
}

pub(super) fn default_filename_template() -> String {
    "capture_%Y-%m-%d_%H%M%S".to_string()
}

fn default_frame_rate() -> u32 {
    30
}

fn default_notifications_enabled() -> bool {
    true
}
