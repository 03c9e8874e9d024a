//! Waste Sorter
//!
//! Photograph an item of waste and get back how to dispose of it: the
//! category, the handling method, and step-by-step notes.
//!
//! # Architecture
//!
//! Two state machines, driven by one single-threaded event loop:
//!
//! 1. **Capture Controller** (`capture`): owns the camera, acquires one
//!    still per session from the live stream or a picked file, and releases
//!    the device on every exit path.
//! 2. **Classification Orchestrator** (`classify`): sends the still to the
//!    remote classifier, maps the top detection through the disposal table,
//!    and applies only the latest request's answer.
//!
//! Every classification ends in a `WasteResult`: a mapped instruction,
//! `Unrecognized`, or `CommunicationFailure`. None of these is an error.
//!
//! # Module Structure
//!
//! - `frame`: encoded still contract (`EncodedFrame`, `VideoFrame`)
//! - `capture`: camera/file acquisition and device backends
//! - `classify`: orchestrator, wire formats, HTTP transport
//! - `disposal`: lookup table and `WasteResult`
//! - `workflow`: event-driven driver tying both machines together
//! - `config`: file + environment configuration

pub mod capture;
pub mod classify;
pub mod config;
pub mod disposal;
pub mod frame;
pub mod workflow;

pub use capture::{
    CameraAccessError, CameraBackend, CaptureController, CaptureError, CaptureSession,
    CaptureSource, CaptureState, DeviceHandle, Facing, FrameStream,
};
pub use classify::{
    ClassificationRequest, ClassificationState, Classifier, ClassifierError, Detection,
    HttpClassifier, HttpResultSink, Orchestrator, PredictResponse, RequestId, Resolution,
    ResultSink, SaveRecord,
};
pub use disposal::{ClassSource, DisposalEntry, DisposalLookupTable, ResultKind, WasteResult};
pub use frame::{EncodedFrame, VideoFrame};
pub use workflow::{Completion, Workflow, WorkflowView};
