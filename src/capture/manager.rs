use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::{
    capture::{
        aggregate::AggregateResult,
        dependencies::CaptureDependencies,
        pipeline::{CaptureRequest, perform_capture},
        types::{CaptureError, CaptureStatus},
    },
    notification::{Notice, Notifier},
};

/// Result of one request handled by the manager.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// The pipeline ran and produced one outcome per requested sink.
    Delivered(AggregateResult),
    /// Nothing could be delivered.
    Failed(String),
}

/// Runs one-shot captures in the background.
///
/// Requests are queued and handled one at a time on the tokio runtime; the
/// blocking pipeline itself runs on the blocking pool.
#[derive(Clone)]
pub struct CaptureManager {
    /// Channel for sending capture requests.
    request_tx: mpsc::UnboundedSender<CaptureRequest>,
    /// Shared status of the current capture operation.
    status: Arc<Mutex<CaptureStatus>>,
    /// Shared result of the last capture (if any).
    last_result: Arc<Mutex<Option<CaptureOutcome>>>,
}

impl CaptureManager {
    /// Create a capture manager.
    ///
    /// # Arguments
    /// * `runtime_handle` - Tokio runtime handle for spawning async tasks
    /// * `dependencies` - Source, encoder and sinks used for every capture
    /// * `notifier` - Receives a notice after each capture, if set
    pub fn new(
        runtime_handle: &tokio::runtime::Handle,
        dependencies: CaptureDependencies,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<CaptureRequest>();
        let status = Arc::new(Mutex::new(CaptureStatus::Idle));
        let last_result = Arc::new(Mutex::new(None));
        let dependencies = Arc::new(dependencies);

        let status_clone = status.clone();
        let result_clone = last_result.clone();

        runtime_handle.spawn(async move {
            while let Some(request) = request_rx.recv().await {
                log::debug!("Processing capture request: {:?}", request);
                *status_clone.lock().await = CaptureStatus::InProgress;

                let (status, outcome, notice) =
                    match perform_capture(request, dependencies.clone()).await {
                        Ok(result) => {
                            let classification = result.classification();
                            let notice = Notice::from_result(&result);
                            (
                                CaptureStatus::Finished(classification),
                                CaptureOutcome::Delivered(result),
                                notice,
                            )
                        }
                        Err(e) => {
                            let error_message = e.to_string();
                            log::error!("Capture failed: {}", error_message);
                            (
                                CaptureStatus::Failed(error_message.clone()),
                                CaptureOutcome::Failed(error_message),
                                Notice::from_error(&e),
                            )
                        }
                    };

                *status_clone.lock().await = status;
                *result_clone.lock().await = Some(outcome);

                if let Some(notifier) = &notifier
                    && let Err(e) = notifier.notify(&notice).await
                {
                    log::warn!("Failed to send notification: {}", e);
                }
            }
            log::debug!("Capture manager request channel closed");
        });

        Self {
            request_tx,
            status,
            last_result,
        }
    }

    /// Request a capture to the given sinks.
    ///
    /// This is non-blocking and returns immediately. The capture happens
    /// asynchronously in the background.
    pub fn request_capture<S: Into<String>>(
        &self,
        sinks: impl IntoIterator<Item = S>,
    ) -> Result<(), CaptureError> {
        let request = CaptureRequest {
            sinks: sinks.into_iter().map(Into::into).collect(),
        };
        if request.sinks.is_empty() {
            return Err(CaptureError::NoSinks);
        }

        self.request_tx
            .send(request)
            .map_err(|_| CaptureError::ManagerStopped)?;

        Ok(())
    }

    /// Get the current capture status.
    pub async fn get_status(&self) -> CaptureStatus {
        self.status.lock().await.clone()
    }

    /// Get the result of the last capture and clear it.
    pub async fn take_result(&self) -> Option<CaptureOutcome> {
        self.last_result.lock().await.take()
    }

    /// Try to get the result without waiting (non-blocking).
    pub fn try_take_result(&self) -> Option<CaptureOutcome> {
        self.last_result.try_lock().ok().and_then(|mut r| r.take())
    }

    /// Reset status to idle.
    pub async fn reset(&self) {
        *self.status.lock().await = CaptureStatus::Idle;
    }
}

#[cfg(test)]
impl CaptureManager {
    pub(crate) fn with_closed_channel_for_test() -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<CaptureRequest>();
        drop(rx);
        Self {
            request_tx: tx,
            status: Arc::new(Mutex::new(CaptureStatus::Idle)),
            last_result: Arc::new(Mutex::new(None)),
        }
    }
}
