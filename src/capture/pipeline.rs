use std::{fmt, io::Write, sync::Arc};

use crate::capture::{
    affinity::AffinityExecutors,
    aggregate::{AggregateResult, aggregate},
    arranger::StreamArranger,
    broadcast::FanOutBroadcaster,
    dependencies::{CaptureDependencies, StillEncoder},
    registry::Candidate,
    types::{CaptureError, Frame},
};
use tokio::task;

/// Arrange, encode, fan out and aggregate for a single still frame.
#[derive(Clone)]
pub struct Pipeline {
    arranger: StreamArranger,
    broadcaster: FanOutBroadcaster,
}

impl Pipeline {
    pub fn new(executors: AffinityExecutors) -> Self {
        Self {
            arranger: StreamArranger::new(executors.clone()),
            broadcaster: FanOutBroadcaster::new(executors),
        }
    }

    pub fn with_parts(arranger: StreamArranger, broadcaster: FanOutBroadcaster) -> Self {
        Self {
            arranger,
            broadcaster,
        }
    }

    pub fn arranger(&self) -> &StreamArranger {
        &self.arranger
    }

    pub fn broadcaster(&self) -> &FanOutBroadcaster {
        &self.broadcaster
    }

    /// Delivers one encoded frame to every candidate sink.
    ///
    /// Returns one outcome per candidate. Errors are reserved for failures
    /// that leave nothing to report: no candidates, no usable master, or the
    /// encoder failing before any sink received bytes.
    pub fn run_one_shot(
        &self,
        candidates: &[Candidate],
        encoder: &dyn StillEncoder,
        frame: &Frame,
    ) -> Result<AggregateResult, CaptureError> {
        if candidates.is_empty() {
            return Err(CaptureError::NoSinks);
        }

        let metadata = encoder.metadata(frame.width, frame.height);
        log::info!(
            "Starting one-shot capture: {}x{} {} to {} sink(s)",
            frame.width,
            frame.height,
            metadata.media_type,
            candidates.len()
        );

        let arrangement = self.arranger.arrange(candidates, &metadata)?;
        let mut master = arrangement.master;

        // An encode failure drops every sink uncommitted.
        encoder.encode(frame, &mut master)?;
        master
            .flush()
            .map_err(|err| CaptureError::Encode(err.to_string()))?;

        let reports = self.broadcaster.broadcast(master, arrangement.secondaries);
        aggregate(arrangement.failed, reports)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(AffinityExecutors::new())
    }
}

/// Acquires one frame from the configured source and runs it through the pipeline.
pub fn capture_once<S: AsRef<str>>(
    dependencies: &CaptureDependencies,
    sink_ids: &[S],
) -> Result<AggregateResult, CaptureError> {
    if sink_ids.is_empty() {
        return Err(CaptureError::NoSinks);
    }

    let candidates = dependencies.registry.resolve(sink_ids);
    let pipeline = Pipeline::new(dependencies.executors.clone());

    let mut source = dependencies.sources.open()?;
    let frame = source.acquire_frame();
    let result = frame.and_then(|frame| {
        log::debug!("Acquired frame: {:?}", frame);
        let result = pipeline.run_one_shot(&candidates, dependencies.encoder.as_ref(), &frame);
        source.release_frame();
        result
    });
    source.dispose();
    result
}

#[derive(Clone)]
pub(crate) struct CaptureRequest {
    pub(crate) sinks: Vec<String>,
}

impl fmt::Debug for CaptureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureRequest")
            .field("sinks", &self.sinks.join(","))
            .finish()
    }
}

pub(crate) async fn perform_capture(
    request: CaptureRequest,
    dependencies: Arc<CaptureDependencies>,
) -> Result<AggregateResult, CaptureError> {
    log::info!("Starting capture: {:?}", request);
    task::spawn_blocking(move || capture_once(&dependencies, &request.sinks))
        .await
        .map_err(|e| CaptureError::WorkerPanicked(format!("capture task: {}", e)))?
}
