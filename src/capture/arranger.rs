//! Master/secondary sink selection and construction.

use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use super::{
    affinity::{AffinityExecutors, panic_message},
    registry::Candidate,
    sink::{MemorySink, Sink, SinkReader},
    types::{CaptureError, EncodingMetadata, SinkDescriptor},
};

type FallbackFn = dyn Fn() -> Result<Box<dyn Sink>, CaptureError> + Send + Sync;

/// A constructed secondary sink together with the descriptor it was built from.
pub struct BoundSink {
    pub descriptor: SinkDescriptor,
    pub sink: Box<dyn Sink>,
}

impl fmt::Debug for BoundSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSink")
            .field("descriptor", &self.descriptor.id)
            .finish_non_exhaustive()
    }
}

/// The sink the encoder writes into.
///
/// A master without a descriptor is an internal buffer and never shows up in
/// results.
pub struct MasterSink {
    descriptor: Option<SinkDescriptor>,
    sink: Box<dyn Sink>,
}

impl MasterSink {
    fn reported(descriptor: SinkDescriptor, sink: Box<dyn Sink>) -> Self {
        Self {
            descriptor: Some(descriptor),
            sink,
        }
    }

    fn internal(sink: Box<dyn Sink>) -> Self {
        Self {
            descriptor: None,
            sink,
        }
    }

    pub fn descriptor(&self) -> Option<&SinkDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn is_readable(&self) -> bool {
        self.sink.is_readable()
    }

    /// Opens an independent reader at the start of the encoded payload.
    pub fn open_reader(&self) -> io::Result<SinkReader> {
        self.sink.open_reader()
    }

    pub(crate) fn into_parts(self) -> (Option<SinkDescriptor>, Box<dyn Sink>) {
        (self.descriptor, self.sink)
    }

    pub(crate) fn label(&self) -> &str {
        self.descriptor
            .as_ref()
            .map_or("internal buffer", |descriptor| descriptor.name.as_str())
    }
}

impl Write for MasterSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl fmt::Debug for MasterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSink")
            .field("sink", &self.label())
            .finish_non_exhaustive()
    }
}

/// A requested sink that could not be built.
#[derive(Debug)]
pub struct ConstructionFailure {
    pub descriptor: SinkDescriptor,
    pub error: CaptureError,
}

/// Result of arranging the candidate sinks for one capture or recording.
#[derive(Debug)]
pub struct Arrangement {
    pub master: MasterSink,
    pub secondaries: Vec<BoundSink>,
    pub failed: Vec<ConstructionFailure>,
}

impl Arrangement {
    /// Number of requested sinks this arrangement accounts for.
    pub fn reported_len(&self) -> usize {
        self.failed.len() + self.secondaries.len() + usize::from(self.master.descriptor.is_some())
    }
}

/// Builds an [`Arrangement`] from candidate sinks.
#[derive(Clone)]
pub struct StreamArranger {
    executors: AffinityExecutors,
    fallback: Arc<FallbackFn>,
}

impl StreamArranger {
    pub fn new(executors: AffinityExecutors) -> Self {
        Self {
            executors,
            fallback: Arc::new(|| Ok(Box::new(MemorySink::new()) as Box<dyn Sink>)),
        }
    }

    /// Replaces the in-memory fallback used when no candidate can be master.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Sink>, CaptureError> + Send + Sync + 'static,
    {
        self.fallback = Arc::new(fallback);
        self
    }

    /// Selects and constructs the master, then every other candidate as a
    /// secondary.
    ///
    /// Memory-backed candidates are preferred as master. Secondary construction
    /// failures are recorded in [`Arrangement::failed`] rather than returned; the
    /// only fatal error is failing to get any readable master at all.
    pub fn arrange(
        &self,
        candidates: &[Candidate],
        metadata: &EncodingMetadata,
    ) -> Result<Arrangement, CaptureError> {
        let master_index = candidates
            .iter()
            .position(|candidate| candidate.descriptor().prefers_memory)
            .unwrap_or(0);
        let mut failed = Vec::new();

        let mut master = match candidates.get(master_index) {
            Some(preferred) => {
                let descriptor = preferred.descriptor().clone();
                match self.construct(preferred, metadata) {
                    Ok(sink) => {
                        log::debug!("Selected {} as master sink", descriptor.name);
                        MasterSink::reported(descriptor, sink)
                    }
                    Err(error) => {
                        log::warn!(
                            "Could not create master sink {} ({}); falling back to memory buffer",
                            descriptor.name,
                            error
                        );
                        failed.push(ConstructionFailure { descriptor, error });
                        self.fallback_master()?
                    }
                }
            }
            None => self.fallback_master()?,
        };

        let mut secondaries = Vec::with_capacity(candidates.len().saturating_sub(1));
        for (index, candidate) in candidates.iter().enumerate() {
            if index == master_index {
                continue;
            }
            let descriptor = candidate.descriptor().clone();
            match self.construct(candidate, metadata) {
                Ok(sink) => secondaries.push(BoundSink { descriptor, sink }),
                Err(error) => {
                    log::error!("Could not initialize sink {}: {}", descriptor.name, error);
                    failed.push(ConstructionFailure { descriptor, error });
                }
            }
        }

        if !master.is_readable() {
            let Some(descriptor) = master.descriptor.take() else {
                return Err(CaptureError::NoUsableSink(
                    "fallback buffer is not readable".to_string(),
                ));
            };
            log::warn!(
                "Master sink {} cannot be read back; demoting it behind a memory buffer",
                descriptor.name
            );
            let (_, sink) = master.into_parts();
            secondaries.push(BoundSink { descriptor, sink });
            master = self.fallback_master()?;
        }

        log::info!(
            "Arranged sinks: master={}, {} secondary, {} failed",
            master.label(),
            secondaries.len(),
            failed.len()
        );

        Ok(Arrangement {
            master,
            secondaries,
            failed,
        })
    }

    fn construct(
        &self,
        candidate: &Candidate,
        metadata: &EncodingMetadata,
    ) -> Result<Box<dyn Sink>, CaptureError> {
        let descriptor = candidate.descriptor();
        let factory = Arc::clone(candidate);
        let metadata = metadata.clone();
        self.executors
            .run(&descriptor.affinity, &descriptor.id, move || {
                factory.create(&metadata)
            })
            .unwrap_or_else(|panic| {
                Err(CaptureError::SinkConstruction {
                    sink: descriptor.name.clone(),
                    reason: format!("constructor panicked: {}", panic_message(panic.as_ref())),
                })
            })
    }

    fn fallback_master(&self) -> Result<MasterSink, CaptureError> {
        let sink = (self.fallback)()
            .map_err(|err| CaptureError::NoUsableSink(err.to_string()))?;
        if !sink.is_readable() {
            return Err(CaptureError::NoUsableSink(
                "fallback buffer is not readable".to_string(),
            ));
        }
        Ok(MasterSink::internal(sink))
    }
}
