//! Concurrent delivery of the master payload to every secondary sink.

use std::io::{self, Write};

use super::{
    affinity::{AffinityExecutors, TaskHandle, panic_message},
    arranger::{BoundSink, MasterSink},
    sink::SinkReader,
    types::{CaptureError, OperationOutcome, SinkReport},
};

/// Fork-join fan-out from one master sink to N secondaries.
#[derive(Clone, Default)]
pub struct FanOutBroadcaster {
    executors: AffinityExecutors,
}

impl FanOutBroadcaster {
    pub fn new(executors: AffinityExecutors) -> Self {
        Self { executors }
    }

    /// Copies the master's bytes into every secondary, commits each one, then
    /// commits the master.
    ///
    /// Must only be called once the encoder is done with `master`. One worker
    /// is launched per secondary and all of them are joined before the master
    /// is committed and dropped. Reports come back in secondary order followed
    /// by the master's own report (internal masters produce none), no matter
    /// which worker finishes first.
    pub fn broadcast(&self, mut master: MasterSink, secondaries: Vec<BoundSink>) -> Vec<SinkReport> {
        if let Err(err) = master.flush() {
            log::warn!("Flushing master sink {} failed: {}", master.label(), err);
        }

        let pending: Vec<_> = secondaries
            .into_iter()
            .enumerate()
            .map(|(slot, bound)| {
                let descriptor = bound.descriptor.clone();
                let reader = master.open_reader();
                let label = format!("{}#{}", descriptor.id, slot);
                log::debug!("[{}] launching fan-out worker", label);
                let handle = self
                    .executors
                    .spawn(&descriptor.affinity, &label, move || deliver(bound, reader));
                (descriptor, label, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(pending.len() + 1);
        for (descriptor, label, handle) in pending {
            let outcome = join_outcome(handle, &descriptor.name);
            log::debug!("[{}] joined ({})", label, describe(&outcome));
            reports.push(SinkReport::new(descriptor, outcome));
        }

        let (descriptor, sink) = master.into_parts();
        match descriptor {
            Some(descriptor) => {
                let name = descriptor.name.clone();
                let outcome = self
                    .executors
                    .run(&descriptor.affinity, &descriptor.id, move || sink.commit())
                    .map_err(|panic| {
                        CaptureError::WorkerPanicked(format!(
                            "{}: {}",
                            name,
                            panic_message(panic.as_ref())
                        ))
                    })
                    .and_then(|committed| committed)
                    .map_or_else(
                        |err| {
                            log::error!("Error committing master sink {}: {}", name, err);
                            OperationOutcome::failure(err)
                        },
                        OperationOutcome::from,
                    );
                reports.push(SinkReport::new(descriptor, outcome));
            }
            None => {
                if let Err(err) = sink.commit() {
                    log::debug!("Internal master buffer commit failed: {}", err);
                }
            }
        }

        reports
    }
}

fn deliver(bound: BoundSink, reader: io::Result<SinkReader>) -> OperationOutcome {
    let BoundSink {
        descriptor,
        mut sink,
    } = bound;

    let copied = reader
        .and_then(|mut reader| io::copy(&mut reader, &mut sink))
        .and_then(|written| sink.flush().map(|()| written));

    match copied {
        Ok(written) => log::debug!("Copied {} bytes to {}", written, descriptor.name),
        Err(source) => {
            log::error!("Error copying to sink {}: {}", descriptor.name, source);
            return OperationOutcome::failure(CaptureError::Copy {
                sink: descriptor.name,
                source,
            });
        }
    }

    match sink.commit() {
        Ok(committed) => {
            log::info!("Sink {} is done", descriptor.name);
            committed.into()
        }
        Err(err) => {
            log::error!("Error committing sink {}: {}", descriptor.name, err);
            OperationOutcome::failure(err)
        }
    }
}

fn join_outcome(handle: TaskHandle<OperationOutcome>, name: &str) -> OperationOutcome {
    handle.join().unwrap_or_else(|panic| {
        let reason = panic_message(panic.as_ref());
        log::error!("Fan-out worker for {} panicked: {}", name, reason);
        OperationOutcome::failure(CaptureError::WorkerPanicked(format!("{name}: {reason}")))
    })
}

fn describe(outcome: &OperationOutcome) -> &'static str {
    if outcome.is_success() { "success" } else { "failure" }
}
