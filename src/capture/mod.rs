//! Capture fan-out pipeline.
//!
//! One encoded payload is written into a master sink and then copied,
//! concurrently, into every other requested sink:
//! - [`arranger`] picks and builds the master and secondary sinks
//! - [`broadcast`] copies and commits every sink
//! - [`aggregate`] merges the per-sink outcomes and classifies them
//! - [`recording`] drives the same path for continuous video
//!
//! Built-in sinks write files, fill the clipboard, or feed an upload command.

pub mod affinity;
pub mod aggregate;
pub mod arranger;
pub mod broadcast;
pub mod clipboard;
pub mod command;
pub mod dependencies;
pub mod encoders;
pub mod file;
pub mod recording;
pub mod registry;
pub mod sink;
pub mod sources;
pub mod types;

mod manager;
mod pipeline;

pub use aggregate::{AggregateResult, aggregate, classify};
pub use dependencies::{CaptureDependencies, CaptureSource, SourceProvider, StillEncoder, VideoEncoder};
pub use manager::{CaptureManager, CaptureOutcome};
pub use pipeline::{Pipeline, capture_once};
pub use recording::{RecordingOptions, RecordingSession, RecordingState};
pub use registry::{Candidate, SinkRegistry};
pub use sink::{Committed, MemorySink, Sink, SinkFactory};
pub use types::{
    CaptureError, CaptureStatus, Classification, EncodingMetadata, Frame, OperationOutcome,
    SinkDescriptor, SinkReport, ThreadAffinity,
};
