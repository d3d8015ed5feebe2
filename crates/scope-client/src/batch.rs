//! Burst capture: several photos in a row with fixed pacing.

use crate::capture::CaptureWorkflow;
use parking_lot::Mutex;
use scope_core::records::{CapturedImage, Eye};
use scope_core::{Result, ScopeError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shots per batch unless told otherwise.
pub const DEFAULT_BATCH_COUNT: usize = 5;
/// Pause between shots (two per second).
pub const DEFAULT_INTER_SHOT_DELAY: Duration = Duration::from_millis(500);

/// Receives batch progress and outcome.
///
/// Exactly one of `on_complete` / `on_error` fires per batch.
pub trait BatchObserver: Send + Sync {
    /// Shot `current` of `total` is about to be taken (1-based).
    fn on_progress(&self, _current: usize, _total: usize) {}
    /// Every shot succeeded.
    fn on_complete(&self, _captures: &[CapturedImage]) {}
    /// The batch stopped early.
    fn on_error(&self, _error: &ScopeError) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// Cloneable cancel switch for a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs capture batches on a [`CaptureWorkflow`].
pub struct BatchCaptureController {
    workflow: Arc<CaptureWorkflow>,
    observer: Arc<dyn BatchObserver>,
    inter_shot_delay: Duration,
    cancel: CancelHandle,
}

impl BatchCaptureController {
    #[must_use]
    pub fn new(workflow: Arc<CaptureWorkflow>) -> Self {
        Self {
            workflow,
            observer: Arc::new(NoopObserver),
            inter_shot_delay: DEFAULT_INTER_SHOT_DELAY,
            cancel: CancelHandle::default(),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_inter_shot_delay(mut self, delay: Duration) -> Self {
        self.inter_shot_delay = delay;
        self
    }

    /// Request the running batch to stop before its next shot.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Take `count` photos, pausing between shots.
    ///
    /// Returns the captures on success. On cancellation the error is
    /// [`ScopeError::BatchCancelled`]; on a failed shot it is that shot's
    /// error. Either way the observer has already been told.
    pub async fn start(
        &self,
        session_id: &str,
        patient_id: &str,
        eye: Eye,
        count: usize,
    ) -> Result<Vec<CapturedImage>> {
        self.cancel.reset();
        let collected: Arc<Mutex<Vec<CapturedImage>>> = Arc::new(Mutex::new(Vec::with_capacity(count)));
        let sink = collected.clone();
        self.workflow
            .set_capture_complete_handler(Some(Arc::new(move |image: &CapturedImage| {
                sink.lock().push(image.clone());
            })));

        info!("Batch of {} started (session {})", count, session_id);
        let outcome = self.run(session_id, patient_id, eye, count, &collected).await;
        self.workflow.set_capture_complete_handler(None);

        match outcome {
            Ok(()) => {
                let captures = std::mem::take(&mut *collected.lock());
                info!("Batch complete: {} capture(s)", captures.len());
                self.observer.on_complete(&captures);
                Ok(captures)
            }
            Err(e) => {
                warn!("Batch stopped: {}", e);
                self.observer.on_error(&e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session_id: &str,
        patient_id: &str,
        eye: Eye,
        count: usize,
        collected: &Mutex<Vec<CapturedImage>>,
    ) -> Result<()> {
        for i in 0..count {
            if self.cancel.is_cancelled() {
                return Err(ScopeError::BatchCancelled {
                    completed: collected.lock().len(),
                });
            }
            self.observer.on_progress(i + 1, count);
            self.workflow.capture(session_id, patient_id, eye).await?;

            if i + 1 < count {
                tokio::time::sleep(self.inter_shot_delay).await;
            }
        }
        Ok(())
    }
}
