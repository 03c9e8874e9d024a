//! Capture-and-classify workflow.
//!
//! `Workflow` owns both state machines and is driven from a single-threaded
//! tokio runtime. The only suspension points are the camera grant and the
//! network round trips:
//!
//! 1. `request_camera` awaits the backend's grant or refusal.
//! 2. `capture_frame` / `select_file` produce a still and submit it.
//! 3. `/predict` runs on the blocking pool; its completion comes back over
//!    a channel and is applied by `next_completion`, which discards anything
//!    superseded in the meantime.
//! 4. Applied classifier answers are reported to `/save` in the background.
//!    Report failures are logged and otherwise ignored.
//!
//! All state is touched only from the task that owns the `Workflow`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::capture::{CameraBackend, CaptureController, CaptureError, CaptureState, Facing};
use crate::classify::{
    Classifier, ClassifierError, Orchestrator, PredictResponse, RequestId, Resolution, ResultSink,
    SaveRecord,
};
use crate::disposal::{DisposalLookupTable, WasteResult};
use crate::frame::EncodedFrame;

/// A finished `/predict` round trip, tagged with the request it answers.
#[derive(Debug)]
pub struct Completion {
    pub id: RequestId,
    pub outcome: Result<PredictResponse, ClassifierError>,
}

/// What a renderer needs to draw the current screen.
#[derive(Debug)]
pub struct WorkflowView<'a> {
    pub capture_state: &'a CaptureState,
    pub is_analyzing: bool,
    pub result: Option<&'a WasteResult>,
}

pub struct Workflow<B: CameraBackend> {
    camera: B,
    capture: CaptureController<B::Stream>,
    orchestrator: Orchestrator,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn ResultSink>,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,
    reports: Vec<JoinHandle<()>>,
}

impl<B: CameraBackend> Workflow<B> {
    pub fn new(
        camera: B,
        facing: Facing,
        table: DisposalLookupTable,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (completions_tx, completions_rx) = unbounded_channel();
        Self {
            camera,
            capture: CaptureController::new(facing),
            orchestrator: Orchestrator::new(table),
            classifier,
            sink,
            completions_tx,
            completions_rx,
            reports: Vec::new(),
        }
    }

    pub fn view(&self) -> WorkflowView<'_> {
        WorkflowView {
            capture_state: self.capture.state(),
            is_analyzing: self.orchestrator.is_analyzing(),
            result: self.orchestrator.result(),
        }
    }

    pub fn capture(&self) -> &CaptureController<B::Stream> {
        &self.capture
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn camera(&self) -> &B {
        &self.camera
    }

    pub fn is_analyzing(&self) -> bool {
        self.orchestrator.is_analyzing()
    }

    pub fn result(&self) -> Option<&WasteResult> {
        self.orchestrator.result()
    }

    pub async fn request_camera(&mut self) -> Result<(), CaptureError> {
        self.capture.request_camera(&mut self.camera).await
    }

    /// Take a still from the live camera and submit it.
    pub fn capture_frame(&mut self) -> Result<RequestId, CaptureError> {
        self.capture.capture_frame()?;
        self.hand_off()
    }

    /// Use a picked file and submit it. `None` is a dismissed picker.
    pub fn select_file(&mut self, choice: Option<&Path>) -> Result<RequestId, CaptureError> {
        self.capture.select_file(choice)?;
        self.hand_off()
    }

    fn hand_off(&mut self) -> Result<RequestId, CaptureError> {
        match self.capture.take_frame() {
            Some(frame) => Ok(self.submit(frame)),
            None => Err(CaptureError::InvalidState {
                operation: "hand_off",
                state: self.capture.state().clone(),
            }),
        }
    }

    /// Send a still to the classifier. Must be called within a tokio runtime.
    pub fn submit(&mut self, frame: EncodedFrame) -> RequestId {
        let request = self.orchestrator.submit(frame);
        let id = request.id;
        let classifier = Arc::clone(&self.classifier);
        let tx = self.completions_tx.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| classifier.predict(&request.frame)))
                .unwrap_or_else(|_| {
                    log::error!("classifier {} panicked on {}", classifier.name(), id);
                    Err(ClassifierError::Transport("classifier panicked".to_string()))
                });
            // The receiver lives as long as the workflow; a send error only
            // means the workflow is gone.
            let _ = tx.send(Completion { id, outcome });
        });
        id
    }

    /// Wait for the next `/predict` completion and apply it.
    pub async fn next_completion(&mut self) -> Resolution {
        let Some(completion) = self.completions_rx.recv().await else {
            return Resolution::Stale;
        };
        self.apply(completion)
    }

    fn apply(&mut self, completion: Completion) -> Resolution {
        let resolution = self.orchestrator.resolve(completion.id, completion.outcome);
        if let Resolution::Applied {
            report: Some(record),
            ..
        } = &resolution
        {
            self.report(record.clone());
        }
        resolution
    }

    /// Drive completions until the latest request has a result.
    pub async fn settle(&mut self) -> Option<&WasteResult> {
        while self.orchestrator.is_analyzing() {
            self.next_completion().await;
        }
        self.orchestrator.result()
    }

    fn report(&mut self, record: SaveRecord) {
        self.reports.retain(|handle| !handle.is_finished());
        let sink = Arc::clone(&self.sink);
        self.reports.push(tokio::task::spawn_blocking(move || {
            match sink.save(&record) {
                Ok(()) => log::debug!("reported class {} to persistence", record.class_id),
                Err(err) => log::warn!("persistence report dropped: {:#}", err),
            }
        }));
    }

    /// Wait for background reports to finish. Their outcome is not observable.
    pub async fn flush_reports(&mut self) {
        for handle in self.reports.drain(..) {
            let _ = handle.await;
        }
    }

    /// Back to the start screen. The camera is released before this returns;
    /// requests still in flight will be discarded when they complete.
    pub fn reset(&mut self) {
        self.capture.reset();
        self.orchestrator.reset();
    }
}
