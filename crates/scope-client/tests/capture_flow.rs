//! Capture and batch workflows on a paused clock.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{client_with, Plan, ScriptedFactory};
use parking_lot::Mutex;
use scope_client::{
    BatchCaptureController, BatchObserver, CancelHandle, CaptureWorkflow, DEFAULT_BATCH_COUNT,
};
use scope_core::records::{CapturedImage, Eye};
use scope_core::{ScopeError, TransportMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

async fn connected_workflow(plan: Plan) -> (Arc<ScriptedFactory>, Arc<CaptureWorkflow>) {
    let factory = ScriptedFactory::always(plan);
    let client = client_with(&factory);
    let mode = match plan {
        Plan::Simulated => TransportMode::Simulated,
        _ => TransportMode::Serial,
    };
    client.connect(mode).await.unwrap();
    (factory, Arc::new(CaptureWorkflow::new(client)))
}

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<(usize, usize)>>,
    completed: Mutex<Vec<usize>>,
    errors: Mutex<Vec<String>>,
    cancel_at: Option<(usize, CancelHandle)>,
}

impl BatchObserver for Recorder {
    fn on_progress(&self, current: usize, total: usize) {
        self.progress.lock().push((current, total));
        if let Some((at, handle)) = &self.cancel_at {
            if *at == current {
                handle.cancel();
            }
        }
    }

    fn on_complete(&self, captures: &[CapturedImage]) {
        self.completed.lock().push(captures.len());
    }

    fn on_error(&self, error: &ScopeError) {
        self.errors.lock().push(error.to_string());
    }
}

#[tokio::test(start_paused = true)]
async fn test_capture_success_stamps_metadata() {
    let (_factory, workflow) = connected_workflow(Plan::Simulated).await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    workflow.set_capture_complete_handler(Some(Arc::new(move |_: &CapturedImage| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    let image = workflow.capture("session-1", "patient-9", Eye::Left).await.unwrap();

    assert_eq!(image.metadata.session_id, "session-1");
    assert_eq!(image.metadata.patient_id, "patient-9");
    assert_eq!(image.metadata.eye, Eye::Left);
    assert!(image.metadata.id.starts_with("capture_"));
    assert!(!image.photo.is_empty());
    let thumb = image::load_from_memory(&STANDARD.decode(&image.thumbnail).unwrap()).unwrap();
    assert!(thumb.width() <= 200 && thumb.height() <= 200);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!workflow.client().photo_pending());
}

#[tokio::test(start_paused = true)]
async fn test_capture_times_out_after_ten_seconds() {
    let (factory, workflow) = connected_workflow(Plan::Silent).await;

    let started = Instant::now();
    let err = workflow.capture("s", "p", Eye::Right).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ScopeError::CaptureTimeout(d) if d == Duration::from_secs(10)));
    assert!(elapsed >= Duration::from_secs(10), "timed out after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(10_100), "timed out after {:?}", elapsed);
    assert!(!workflow.client().photo_pending());
    assert_eq!(factory.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_capture_rejected_while_pending() {
    let (_factory, workflow) = connected_workflow(Plan::Silent).await;
    let _held = workflow.client().await_photo().unwrap();

    let err = workflow.capture("s", "p", Eye::Left).await.unwrap_err();
    assert!(matches!(err, ScopeError::CaptureInProgress));
}

#[tokio::test(start_paused = true)]
async fn test_capture_without_link_releases_slot() {
    let factory = ScriptedFactory::always(Plan::Simulated);
    let workflow = CaptureWorkflow::new(client_with(&factory));

    let err = workflow.capture("s", "p", Eye::Left).await.unwrap_err();
    assert!(matches!(err, ScopeError::NotConnected));
    assert!(!workflow.client().photo_pending());
}

#[tokio::test(start_paused = true)]
async fn test_capture_with_timer_waits_first() {
    let (_factory, workflow) = connected_workflow(Plan::Simulated).await;
    let started = Instant::now();
    workflow
        .capture_with_timer("s", "p", Eye::Right, 3)
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(3100));
}

#[tokio::test(start_paused = true)]
async fn test_batch_reports_progress_and_completes() {
    let (_factory, workflow) = connected_workflow(Plan::Simulated).await;
    let recorder = Arc::new(Recorder::default());
    let batch = BatchCaptureController::new(workflow).with_observer(recorder.clone());

    let started = Instant::now();
    let captures = batch
        .start("s", "p", Eye::Left, DEFAULT_BATCH_COUNT)
        .await
        .unwrap();

    assert_eq!(DEFAULT_BATCH_COUNT, 5);
    assert_eq!(captures.len(), 5);
    assert_eq!(
        *recorder.progress.lock(),
        vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]
    );
    assert_eq!(*recorder.completed.lock(), vec![5]);
    assert!(recorder.errors.lock().is_empty());
    // Five ~100 ms shots plus four 500 ms gaps, none after the last.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(3000), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_batch_cancel_stops_before_next_shot() {
    let (_factory, workflow) = connected_workflow(Plan::Simulated).await;
    let batch = BatchCaptureController::new(workflow);
    let recorder = Arc::new(Recorder {
        cancel_at: Some((2, batch.cancel_handle())),
        ..Default::default()
    });
    let batch = batch.with_observer(recorder.clone());

    let err = batch.start("s", "p", Eye::Right, 5).await.unwrap_err();

    assert!(matches!(err, ScopeError::BatchCancelled { completed: 2 }));
    assert_eq!(recorder.progress.lock().len(), 2);
    assert!(recorder.completed.lock().is_empty());
    assert_eq!(recorder.errors.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_aborts_on_failed_shot() {
    let (_factory, workflow) = connected_workflow(Plan::Silent).await;
    let recorder = Arc::new(Recorder::default());
    let batch = BatchCaptureController::new(workflow).with_observer(recorder.clone());

    let err = batch.start("s", "p", Eye::Left, 4).await.unwrap_err();

    assert!(matches!(err, ScopeError::CaptureTimeout(_)));
    assert_eq!(*recorder.progress.lock(), vec![(1, 4)]);
    assert!(recorder.completed.lock().is_empty());
    assert_eq!(recorder.errors.lock().len(), 1);
}
