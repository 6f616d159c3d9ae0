//! Continuous recording built on the same arrange / fan-out / aggregate path
//! as one-shot captures.
//!
//! The arrangement is made once at [`RecordingSession::start`] and reused for
//! every frame. A worker thread feeds frames to the encoder at a fixed
//! interval until [`RecordingSession::stop`] clears the state, after which the
//! encoder is finalized and the master is fanned out to every secondary.

use std::{
    fmt,
    io::Write,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tokio::sync::watch;

use super::{
    affinity::panic_message,
    aggregate::{AggregateResult, aggregate},
    arranger::{BoundSink, ConstructionFailure, MasterSink},
    dependencies::{CaptureSource, VideoEncoder},
    pipeline::Pipeline,
    registry::Candidate,
    types::CaptureError,
};

const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Whether the frame loop is producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// Not started, or stopped.
    #[default]
    Idle,
    Recording,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingOptions {
    pub frame_interval: Duration,
}

impl RecordingOptions {
    pub fn with_frame_rate(frames_per_second: u32) -> Self {
        Self {
            frame_interval: Duration::from_secs(1) / frames_per_second.max(1),
        }
    }
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self::with_frame_rate(30)
    }
}

struct Armed {
    source: Box<dyn CaptureSource>,
    encoder: Box<dyn VideoEncoder>,
}

struct Running {
    worker: JoinHandle<LoopOutput>,
    secondaries: Vec<BoundSink>,
    failed: Vec<ConstructionFailure>,
}

enum Stage {
    Armed(Armed),
    Running(Running),
    Finished,
}

/// One recording, from arming to the aggregated result.
///
/// A session records at most once; after [`stop`](Self::stop) a new session
/// is needed.
pub struct RecordingSession {
    candidates: Vec<Candidate>,
    pipeline: Pipeline,
    options: RecordingOptions,
    stage: Stage,
    state: watch::Sender<RecordingState>,
    /// Held while a frame is written so pause/stop never interleave with an encode.
    gate: Arc<Mutex<()>>,
    frames: Arc<AtomicU64>,
}

impl RecordingSession {
    pub fn new(
        candidates: Vec<Candidate>,
        source: Box<dyn CaptureSource>,
        encoder: Box<dyn VideoEncoder>,
    ) -> Result<Self, CaptureError> {
        if candidates.is_empty() {
            return Err(CaptureError::NoSinks);
        }
        let (state, _) = watch::channel(RecordingState::Idle);
        Ok(Self {
            candidates,
            pipeline: Pipeline::default(),
            options: RecordingOptions::default(),
            stage: Stage::Armed(Armed { source, encoder }),
            state,
            gate: Arc::new(Mutex::new(())),
            frames: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_options(mut self, options: RecordingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> RecordingState {
        *self.state.borrow()
    }

    /// Observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.state.subscribe()
    }

    /// Frames written to the master so far.
    pub fn frames_encoded(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// True once the frame loop has exited on its own (after an error).
    pub fn worker_finished(&self) -> bool {
        match &self.stage {
            Stage::Running(running) => running.worker.is_finished(),
            Stage::Armed(_) | Stage::Finished => false,
        }
    }

    /// Arranges the sinks, starts the encoder and launches the frame loop.
    ///
    /// A failed start leaves the session finished; sinks built so far are
    /// dropped uncommitted.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        let Armed {
            mut source,
            mut encoder,
        } = match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Armed(armed) => armed,
            other => {
                self.stage = other;
                return Err(CaptureError::InvalidState(format!(
                    "cannot start from {:?}",
                    self.state()
                )));
            }
        };

        let (width, height) = source.size();
        let metadata = encoder.metadata(width, height);
        log::info!(
            "Starting recording: {}x{} {} every {:?} to {} sink(s)",
            width,
            height,
            metadata.media_type,
            self.options.frame_interval,
            self.candidates.len()
        );

        let started = self
            .pipeline
            .arranger()
            .arrange(&self.candidates, &metadata)
            .and_then(|arrangement| {
                let mut master = arrangement.master;
                encoder.start(width, height, &mut master)?;
                Ok((master, arrangement.secondaries, arrangement.failed))
            });
        let (master, secondaries, failed) = match started {
            Ok(parts) => parts,
            Err(err) => {
                source.dispose();
                return Err(err);
            }
        };

        // Must be Recording before the worker reads it.
        self.state.send_replace(RecordingState::Recording);
        let frame_loop = FrameLoop {
            master,
            encoder,
            source,
            state: self.state.subscribe(),
            gate: Arc::clone(&self.gate),
            frames: Arc::clone(&self.frames),
            interval: self.options.frame_interval,
        };

        let worker = match thread::Builder::new()
            .name("recording".into())
            .spawn(move || frame_loop.run())
        {
            Ok(worker) => worker,
            Err(err) => {
                self.state.send_replace(RecordingState::Idle);
                return Err(CaptureError::Io(err));
            }
        };

        self.stage = Stage::Running(Running {
            worker,
            secondaries,
            failed,
        });
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), CaptureError> {
        self.transition(RecordingState::Recording, RecordingState::Paused)
    }

    pub fn resume(&mut self) -> Result<(), CaptureError> {
        self.transition(RecordingState::Paused, RecordingState::Recording)
    }

    /// Ends the recording and delivers it to every sink.
    ///
    /// Stopping before any frame was produced still commits every sink.
    pub fn stop(&mut self) -> Result<AggregateResult, CaptureError> {
        let running = match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Running(running) => running,
            other => {
                self.stage = other;
                return Err(CaptureError::InvalidState(format!(
                    "cannot stop from {:?}",
                    self.state()
                )));
            }
        };

        self.set_state(RecordingState::Idle);
        let Running {
            worker,
            secondaries,
            failed,
        } = running;

        let LoopOutput {
            mut master,
            mut encoder,
            mut source,
            error,
        } = worker.join().map_err(|panic| {
            CaptureError::WorkerPanicked(format!("recording: {}", panic_message(panic.as_ref())))
        })?;
        log::info!("Recording stopped after {} frames", self.frames_encoded());

        let finished = match error {
            Some(err) => Err(err),
            None => encoder.end(&mut master).and_then(|()| {
                master
                    .flush()
                    .map_err(|err| CaptureError::Encode(err.to_string()))
            }),
        };
        if let Err(err) = finished {
            log::error!("Recording failed: {}", err);
            source.dispose();
            return Err(err);
        }

        let reports = self.pipeline.broadcaster().broadcast(master, secondaries);
        let result = aggregate(failed, reports);
        source.dispose();
        result
    }

    fn transition(&self, from: RecordingState, to: RecordingState) -> Result<(), CaptureError> {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *self.state.borrow();
        if current != from || !matches!(self.stage, Stage::Running(_)) {
            return Err(CaptureError::InvalidState(format!(
                "cannot go from {:?} to {:?}",
                current, to
            )));
        }
        self.state.send_replace(to);
        log::debug!("Recording state {:?} -> {:?}", from, to);
        Ok(())
    }

    fn set_state(&self, to: RecordingState) {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.send_replace(to);
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Stage::Running(running) = std::mem::replace(&mut self.stage, Stage::Finished) {
            log::warn!(
                "Recording dropped while {:?}; abandoning {} sink(s)",
                self.state(),
                running.secondaries.len() + 1
            );
            self.set_state(RecordingState::Idle);
            match running.worker.join() {
                Ok(mut output) => output.source.dispose(),
                Err(panic) => log::error!(
                    "Frame loop panicked, capture source not disposed: {}",
                    panic_message(panic.as_ref())
                ),
            }
        }
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("state", &self.state())
            .field("sinks", &self.candidates.len())
            .field("frames", &self.frames_encoded())
            .finish_non_exhaustive()
    }
}

struct LoopOutput {
    master: MasterSink,
    encoder: Box<dyn VideoEncoder>,
    source: Box<dyn CaptureSource>,
    error: Option<CaptureError>,
}

struct FrameLoop {
    master: MasterSink,
    encoder: Box<dyn VideoEncoder>,
    source: Box<dyn CaptureSource>,
    state: watch::Receiver<RecordingState>,
    gate: Arc<Mutex<()>>,
    frames: Arc<AtomicU64>,
    interval: Duration,
}

impl FrameLoop {
    fn run(mut self) -> LoopOutput {
        let error = self.pump().err();
        if let Some(err) = &error {
            log::error!("Frame loop stopped: {}", err);
        }
        LoopOutput {
            master: self.master,
            encoder: self.encoder,
            source: self.source,
            error,
        }
    }

    fn pump(&mut self) -> Result<(), CaptureError> {
        let started = Instant::now();
        let mut paused_total = Duration::ZERO;
        let mut paused_since: Option<Instant> = None;
        let mut next_tick = started;

        loop {
            let state = *self.state.borrow();
            match state {
                RecordingState::Idle => return Ok(()),
                RecordingState::Paused => {
                    paused_since.get_or_insert_with(Instant::now);
                    thread::sleep(self.interval.min(PAUSE_POLL));
                    continue;
                }
                RecordingState::Recording => {
                    if let Some(since) = paused_since.take() {
                        paused_total += since.elapsed();
                        next_tick = Instant::now();
                    }
                }
            }

            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            }
            // Late ticks are dropped rather than bunched up.
            next_tick = (next_tick + self.interval).max(Instant::now());

            let frame = self.source.acquire_frame()?;
            let timestamp = started.elapsed().saturating_sub(paused_total);
            let encoded = {
                let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
                if *self.state.borrow() == RecordingState::Recording {
                    self.encoder
                        .encode(&frame, timestamp, &mut self.master)
                        .map(|()| true)
                } else {
                    Ok(false)
                }
            };
            self.source.release_frame();

            if encoded? {
                self.frames.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}
