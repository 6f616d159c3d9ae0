//! Execution contexts for sinks with thread requirements.
//!
//! Sinks with [`ThreadAffinity::Any`] get a fresh worker thread per job. Sinks
//! declaring [`ThreadAffinity::Dedicated`] are served by one long-lived thread
//! per tag, fed through a job queue, so e.g. every clipboard operation happens
//! on the same thread. When an affinity cannot be honored the job still runs on
//! a general worker and a warning is logged.

use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, mpsc},
    thread::{self, JoinHandle},
};

use super::types::ThreadAffinity;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a job launched through [`AffinityExecutors::spawn`].
pub enum TaskHandle<T> {
    Thread(JoinHandle<T>),
    Queued(mpsc::Receiver<thread::Result<T>>),
    Ready(thread::Result<T>),
}

impl<T> TaskHandle<T> {
    /// Blocks until the job finishes. `Err` means the job panicked.
    pub fn join(self) -> thread::Result<T> {
        match self {
            TaskHandle::Thread(handle) => handle.join(),
            TaskHandle::Queued(rx) => rx
                .recv()
                .unwrap_or_else(|_| Err(lost("dedicated worker exited before replying"))),
            TaskHandle::Ready(result) => result,
        }
    }
}

struct DedicatedWorker {
    jobs: mpsc::Sender<Job>,
}

impl DedicatedWorker {
    fn start(tag: &str) -> std::io::Result<Self> {
        let (jobs, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(format!("sink-{tag}"))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })?;
        log::debug!("Started dedicated worker for affinity '{}'", tag);
        Ok(Self { jobs })
    }
}

/// Shared pool of dedicated workers, keyed by affinity tag.
#[derive(Clone, Default)]
pub struct AffinityExecutors {
    workers: Arc<Mutex<HashMap<String, DedicatedWorker>>>,
}

impl AffinityExecutors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches `job` honoring `affinity`; `label` names the worker in logs.
    pub fn spawn<T, F>(&self, affinity: &ThreadAffinity, label: &str, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match affinity {
            ThreadAffinity::Any => spawn_general(label, job),
            ThreadAffinity::Dedicated(tag) => {
                let (tx, rx) = mpsc::sync_channel(1);
                let queued: Job = Box::new(move || {
                    let _ = tx.send(panic::catch_unwind(AssertUnwindSafe(job)));
                });
                match self.enqueue(tag, queued) {
                    Ok(()) => TaskHandle::Queued(rx),
                    Err(queued) => {
                        log::warn!(
                            "Could not honor affinity '{}' for {}; using a general worker",
                            tag,
                            label
                        );
                        // The job reports through `rx` whichever thread runs it.
                        let _ = spawn_general(label, queued);
                        TaskHandle::Queued(rx)
                    }
                }
            }
        }
    }

    /// Runs `job` to completion honoring `affinity`.
    ///
    /// [`ThreadAffinity::Any`] jobs run inline on the calling thread.
    pub fn run<T, F>(&self, affinity: &ThreadAffinity, label: &str, job: F) -> thread::Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match affinity {
            ThreadAffinity::Any => panic::catch_unwind(AssertUnwindSafe(job)),
            ThreadAffinity::Dedicated(_) => self.spawn(affinity, label, job).join(),
        }
    }

    fn enqueue(&self, tag: &str, job: Job) -> Result<(), Job> {
        let Ok(mut workers) = self.workers.lock() else {
            return Err(job);
        };

        if !workers.contains_key(tag) {
            match DedicatedWorker::start(tag) {
                Ok(worker) => {
                    workers.insert(tag.to_string(), worker);
                }
                Err(err) => {
                    log::warn!("Failed to start worker for affinity '{}': {}", tag, err);
                    return Err(job);
                }
            }
        }

        let Some(worker) = workers.get(tag) else {
            return Err(job);
        };
        match worker.jobs.send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::SendError(job)) => {
                workers.remove(tag);
                Err(job)
            }
        }
    }
}

fn spawn_general<T, F>(label: &str, job: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match thread::Builder::new()
        .name(format!("fanout-{label}"))
        .spawn(job)
    {
        Ok(handle) => TaskHandle::Thread(handle),
        Err(err) => {
            log::error!("Failed to spawn worker for {}: {}", label, err);
            TaskHandle::Ready(Err(lost("worker thread could not be spawned")))
        }
    }
}

fn lost(reason: &'static str) -> Box<dyn Any + Send> {
    Box::new(reason)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_jobs_share_one_named_thread() {
        let executors = AffinityExecutors::new();
        let affinity = ThreadAffinity::dedicated("clipboard");

        let names: Vec<_> = (0..3)
            .map(|i| {
                executors.spawn(&affinity, &format!("job{i}"), || {
                    let current = thread::current();
                    (current.id(), current.name().map(str::to_string))
                })
            })
            .map(|handle| handle.join().unwrap())
            .collect();

        assert!(names.iter().all(|(id, _)| *id == names[0].0));
        assert_eq!(names[0].1.as_deref(), Some("sink-clipboard"));
    }

    #[test]
    fn distinct_tags_get_distinct_threads() {
        let executors = AffinityExecutors::new();
        let a = executors
            .spawn(&ThreadAffinity::dedicated("a"), "a", || thread::current().id())
            .join()
            .unwrap();
        let b = executors
            .spawn(&ThreadAffinity::dedicated("b"), "b", || thread::current().id())
            .join()
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn general_jobs_run_on_named_workers() {
        let executors = AffinityExecutors::new();
        let name = executors
            .spawn(&ThreadAffinity::Any, "file#0", || {
                thread::current().name().map(str::to_string)
            })
            .join()
            .unwrap();
        assert_eq!(name.as_deref(), Some("fanout-file#0"));
    }

    #[test]
    fn panicking_dedicated_job_does_not_kill_worker() {
        let executors = AffinityExecutors::new();
        let affinity = ThreadAffinity::dedicated("fragile");

        let panicked = executors
            .spawn(&affinity, "boom", || -> u32 { panic!("plugin bug") })
            .join();
        assert!(panicked.is_err());

        let value = executors.spawn(&affinity, "after", || 7).join().unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload = panic::catch_unwind(|| panic!("sink exploded")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "sink exploded");
    }

    #[test]
    fn run_any_executes_inline() {
        let executors = AffinityExecutors::new();
        let caller = thread::current().id();
        let ran_on = executors
            .run(&ThreadAffinity::Any, "inline", || thread::current().id())
            .unwrap();
        assert_eq!(caller, ran_on);
    }
}
