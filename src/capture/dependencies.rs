use std::{io::Write, sync::Arc, time::Duration};

use crate::capture::{
    affinity::AffinityExecutors,
    encoders::PpmEncoder,
    registry::SinkRegistry,
    sources::PatternSourceProvider,
    types::{CaptureError, EncodingMetadata, Frame},
};

/// Produces frames of a fixed screen region.
pub trait CaptureSource: Send {
    /// Size in pixels of every frame this source produces.
    fn size(&self) -> (u32, u32);

    fn acquire_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Returns resources held for the last acquired frame.
    fn release_frame(&mut self) {}

    fn dispose(&mut self) {}
}

/// Opens a capture source for one capture or recording.
pub trait SourceProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureError>;
}

/// Encodes a single frame into a still image.
pub trait StillEncoder: Send + Sync {
    fn metadata(&self, width: u32, height: u32) -> EncodingMetadata;

    fn encode(&self, frame: &Frame, out: &mut dyn Write) -> Result<(), CaptureError>;
}

/// Encodes a stream of frames.
pub trait VideoEncoder: Send {
    fn metadata(&self, width: u32, height: u32) -> EncodingMetadata;

    fn start(&mut self, width: u32, height: u32, out: &mut dyn Write) -> Result<(), CaptureError>;

    /// Encodes one frame presented `timestamp` after the recording started.
    fn encode(
        &mut self,
        frame: &Frame,
        timestamp: Duration,
        out: &mut dyn Write,
    ) -> Result<(), CaptureError>;

    /// Writes end-of-stream data. Called exactly once, after the last frame.
    fn end(&mut self, out: &mut dyn Write) -> Result<(), CaptureError>;
}

/// Bundle of dependencies used by the one-shot pipeline. Each component can be mocked in tests.
#[derive(Clone)]
pub struct CaptureDependencies {
    pub sources: Arc<dyn SourceProvider>,
    pub encoder: Arc<dyn StillEncoder>,
    pub registry: SinkRegistry,
    pub executors: AffinityExecutors,
}

impl CaptureDependencies {
    /// Pattern source and PPM encoder over the given registry.
    pub fn with_registry(registry: SinkRegistry) -> Self {
        Self {
            sources: Arc::new(PatternSourceProvider::default()),
            encoder: Arc::new(PpmEncoder),
            registry,
            executors: AffinityExecutors::new(),
        }
    }
}
