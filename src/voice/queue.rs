//! Single-slot speech queue
//!
//! Runs requests one after another on a background task. Cancelling stops
//! scheduling; the request already playing is left to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use super::request::SynthesisRequest;
use crate::{Error, Result};

/// Handle for submitting speech requests
#[derive(Clone)]
pub struct SpeechQueue {
    tx: mpsc::Sender<SynthesisRequest>,
    cancelled: Arc<AtomicBool>,
}

impl SpeechQueue {
    /// Start the worker task
    #[must_use]
    pub fn spawn(dispatcher: Arc<Dispatcher>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SynthesisRequest>(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let worker_cancelled = Arc::clone(&cancelled);

        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                if worker_cancelled.load(Ordering::Acquire) {
                    tracing::debug!(backend = %request.backend, "dropping queued speech request");
                    continue;
                }
                // Failures are already logged by the dispatcher
                let _ = dispatcher.synthesize(&request).await;
            }
            tracing::debug!("speech queue closed");
        });

        (Self { tx, cancelled }, worker)
    }

    /// Queue a request, waiting while another one is pending
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRequest` if the queue was cancelled or its
    /// worker has stopped
    pub async fn enqueue(&self, request: SynthesisRequest) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::InvalidRequest("speech queue cancelled".to_string()));
        }
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::InvalidRequest("speech queue closed".to_string()))
    }

    /// Stop starting new requests
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
