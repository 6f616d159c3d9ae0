//! Data types for the capture fan-out pipeline.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use url::Url;

/// Execution context a sink must be constructed and committed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadAffinity {
    /// Any worker thread will do.
    #[default]
    Any,
    /// A long-lived named thread shared by every sink declaring the same tag.
    Dedicated(String),
}

impl ThreadAffinity {
    pub fn dedicated(tag: impl Into<String>) -> Self {
        Self::Dedicated(tag.into())
    }
}

/// Identifies a pluggable sink implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkDescriptor {
    /// Registry key (e.g. `file`, `clipboard`).
    pub id: String,
    /// Human-readable name shown in results.
    pub name: String,
    /// Sink buffers in memory and is cheap to re-read; ranks first for master selection.
    pub prefers_memory: bool,
    pub affinity: ThreadAffinity,
}

impl SinkDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prefers_memory: false,
            affinity: ThreadAffinity::Any,
        }
    }

    pub fn in_memory(mut self) -> Self {
        self.prefers_memory = true;
        self
    }

    pub fn with_affinity(mut self, affinity: ThreadAffinity) -> Self {
        self.affinity = affinity;
        self
    }
}

/// Parameters handed to sinks at construction so they can adapt to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingMetadata {
    /// MIME type of the encoded payload (e.g. `image/x-portable-pixmap`).
    pub media_type: String,
    /// File extension without the leading dot.
    pub extension: String,
    pub width: u32,
    pub height: u32,
}

impl EncodingMetadata {
    pub fn is_image(&self) -> bool {
        self.media_type
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
    }
}

/// A single captured bitmap (tightly packed RGBA8 unless `stride` says otherwise).
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width as usize * 4,
            data,
        }
    }

    /// Returns the RGBA bytes of row `y`, or `None` when out of bounds.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let start = y as usize * self.stride;
        self.data.get(start..start + self.width as usize * 4)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Result of committing one sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success {
        uri: Option<Url>,
        title: String,
        content: String,
    },
    Failure {
        #[serde(serialize_with = "serialize_cause")]
        cause: Arc<CaptureError>,
    },
}

impl OperationOutcome {
    pub fn success(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Success {
            uri: None,
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn failure(cause: CaptureError) -> Self {
        Self::Failure {
            cause: Arc::new(cause),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn uri(&self) -> Option<&Url> {
        match self {
            Self::Success { uri, .. } => uri.as_ref(),
            Self::Failure { .. } => None,
        }
    }
}

fn serialize_cause<S: Serializer>(cause: &Arc<CaptureError>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&cause.to_string())
}

/// Outcome of one requested sink, labelled with the sink that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct SinkReport {
    pub sink: SinkDescriptor,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

impl SinkReport {
    pub fn new(sink: SinkDescriptor, outcome: OperationOutcome) -> Self {
        Self { sink, outcome }
    }
}

/// Overall result class, driving how the outcome is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    AllFailed,
    AllSucceeded,
    Partial,
}

/// Errors that can occur while capturing, encoding or delivering.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No output sinks were requested")]
    NoSinks,

    #[error("No sink named '{0}' is registered")]
    UnknownSink(String),

    #[error("Failed to initialize {sink}: {reason}")]
    SinkConstruction { sink: String, reason: String },

    #[error("{sink} does not accept {media_type} payloads")]
    UnsupportedMedia { sink: String, media_type: String },

    #[error("No usable master sink could be created: {0}")]
    NoUsableSink(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Capture source error: {0}")]
    Source(String),

    #[error("Failed to copy capture to {sink}: {source}")]
    Copy {
        sink: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to commit {sink}: {reason}")]
    Commit { sink: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Clipboard operation failed: {0}")]
    ClipboardError(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Invalid recording state: {0}")]
    InvalidState(String),

    #[error("Worker for {0} panicked")]
    WorkerPanicked(String),

    #[error("Aggregation produced no outcomes")]
    NoOutcomes,

    #[error("Capture manager not running")]
    ManagerStopped,
}

/// Status of the most recent capture handled by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    InProgress,
    Finished(Classification),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_detects_image_media_types() {
        let mut metadata = EncodingMetadata {
            media_type: "IMAGE/png".into(),
            extension: "png".into(),
            width: 1,
            height: 1,
        };
        assert!(metadata.is_image());

        metadata.media_type = "video/x-capturecast".into();
        assert!(!metadata.is_image());

        metadata.media_type = "img".into();
        assert!(!metadata.is_image());
    }

    #[test]
    fn frame_rows_respect_stride() {
        let mut frame = Frame::new(2, 2, vec![0; 24]);
        frame.stride = 12;
        frame.data[12] = 7;
        assert_eq!(frame.row(1).map(|r| r[0]), Some(7));
        assert_eq!(frame.row(1).map(<[u8]>::len), Some(8));
        assert!(frame.row(2).is_none());
    }

    #[test]
    fn failure_outcome_serializes_cause_as_text() {
        let report = SinkReport::new(
            SinkDescriptor::new("file", "Save to file"),
            OperationOutcome::failure(CaptureError::UnknownSink("ftp".into())),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["cause"], "No sink named 'ftp' is registered");
        assert_eq!(json["sink"]["id"], "file");
    }
}
