//! Capture Controller.
//!
//! Owns the camera device and produces exactly one encoded still per
//! capture session, from either a live camera or a file pick.
//!
//! ```text
//! Idle -> CameraRequested -> CameraActive -> FrameCaptured
//! Idle -> FilePicked -> FrameCaptured
//! any  -> Idle (reset)         any camera state -> CameraError
//! ```
//!
//! The device handle lives inside the current `CaptureSession` and nowhere
//! else. Replacing or dropping the session releases the device, so a second
//! camera can never be acquired while the first is still held.

use std::fmt;
use std::path::Path;

pub mod device;
pub mod file;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use device::{CameraAccessError, CameraBackend, DeviceHandle, Facing, FrameStream};
pub use file::read_image_file;
pub use synthetic::{DeviceCounters, SyntheticCamera, SyntheticConfig, SyntheticStream};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::{V4l2Camera, V4l2Config, V4l2Stream};

use crate::frame::EncodedFrame;

/// Where a session's image comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureSource {
    LiveCamera,
    FileInput,
}

/// Observable controller state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    CameraRequested,
    CameraActive,
    FilePicked,
    FrameCaptured,
    CameraError(CameraAccessError),
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::CameraRequested => write!(f, "camera requested"),
            CaptureState::CameraActive => write!(f, "camera active"),
            CaptureState::FilePicked => write!(f, "file picked"),
            CaptureState::FrameCaptured => write!(f, "frame captured"),
            CaptureState::CameraError(reason) => write!(f, "camera error ({})", reason),
        }
    }
}

/// Capture-side failures. All of them leave the controller retryable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    Camera(CameraAccessError),
    /// The device has not produced a frame yet.
    NoActiveStream,
    /// The picker was dismissed. Callers treat this as a no-op.
    NoFileChosen,
    UnreadableFile(String),
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Camera(reason) => write!(f, "{}", reason),
            CaptureError::NoActiveStream => write!(f, "camera has not produced a frame yet"),
            CaptureError::NoFileChosen => write!(f, "no file chosen"),
            CaptureError::UnreadableFile(detail) => write!(f, "unreadable image file: {}", detail),
            CaptureError::InvalidState { operation, state } => {
                write!(f, "{} is not valid while {}", operation, state)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// One attempt to obtain an image.
pub struct CaptureSession<S: FrameStream> {
    source: CaptureSource,
    device: Option<DeviceHandle<S>>,
    frame: Option<EncodedFrame>,
}

impl<S: FrameStream> CaptureSession<S> {
    fn live(device: DeviceHandle<S>) -> Self {
        Self {
            source: CaptureSource::LiveCamera,
            device: Some(device),
            frame: None,
        }
    }

    fn file() -> Self {
        Self {
            source: CaptureSource::FileInput,
            device: None,
            frame: None,
        }
    }

    pub fn source(&self) -> CaptureSource {
        self.source
    }

    pub fn frame(&self) -> Option<&EncodedFrame> {
        self.frame.as_ref()
    }

    pub fn holds_device(&self) -> bool {
        self.device.is_some()
    }

    fn set_frame(&mut self, frame: EncodedFrame) {
        debug_assert!(self.frame.is_none(), "capture session frame set twice");
        if self.frame.is_none() {
            self.frame = Some(frame);
        }
    }

    fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            device.release();
        }
    }
}

pub struct CaptureController<S: FrameStream> {
    state: CaptureState,
    session: Option<CaptureSession<S>>,
    facing: Facing,
}

impl<S: FrameStream> CaptureController<S> {
    pub fn new(facing: Facing) -> Self {
        Self {
            state: CaptureState::Idle,
            session: None,
            facing,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn session(&self) -> Option<&CaptureSession<S>> {
        self.session.as_ref()
    }

    pub fn holds_device(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.holds_device())
    }

    /// Request the camera. Any previous session is discarded (and its device
    /// released) before the new request is made.
    pub async fn request_camera<B>(&mut self, backend: &mut B) -> Result<(), CaptureError>
    where
        B: CameraBackend<Stream = S>,
    {
        self.discard_session();
        self.transition(CaptureState::CameraRequested);
        match backend.open(self.facing).await {
            Ok(stream) => {
                self.session = Some(CaptureSession::live(DeviceHandle::new(stream)));
                self.transition(CaptureState::CameraActive);
                Ok(())
            }
            Err(reason) => {
                log::warn!("camera request failed: {}", reason);
                self.transition(CaptureState::CameraError(reason.clone()));
                Err(CaptureError::Camera(reason))
            }
        }
    }

    /// Sample the live stream into a still and release the camera.
    pub fn capture_frame(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::CameraActive {
            return Err(self.invalid("capture_frame"));
        }
        let sampled = match self.session.as_mut().and_then(|s| s.device.as_mut()) {
            Some(device) => device.latest_frame().and_then(|frame| match frame {
                Some(frame) => frame.encode().map(Some),
                None => Ok(None),
            }),
            None => return Err(self.invalid("capture_frame")),
        };
        match sampled {
            Ok(Some(encoded)) => {
                log::debug!(
                    "captured {}x{} still ({} bytes)",
                    encoded.width(),
                    encoded.height(),
                    encoded.len()
                );
                if let Some(session) = self.session.as_mut() {
                    session.release_device();
                    session.set_frame(encoded);
                }
                self.transition(CaptureState::FrameCaptured);
                Ok(())
            }
            Ok(None) => Err(CaptureError::NoActiveStream),
            Err(err) => {
                let reason = CameraAccessError::Other(format!("{:#}", err));
                log::warn!("camera failed during capture: {}", reason);
                self.discard_session();
                self.transition(CaptureState::CameraError(reason.clone()));
                Err(CaptureError::Camera(reason))
            }
        }
    }

    /// Use a picked file as the session's image. `None` means the picker was
    /// dismissed, which changes nothing.
    pub fn select_file(&mut self, choice: Option<&Path>) -> Result<(), CaptureError> {
        if !matches!(
            self.state,
            CaptureState::Idle | CaptureState::CameraError(_)
        ) {
            return Err(self.invalid("select_file"));
        }
        let Some(path) = choice else {
            return Err(CaptureError::NoFileChosen);
        };

        self.session = Some(CaptureSession::file());
        self.transition(CaptureState::FilePicked);
        match read_image_file(path) {
            Ok(frame) => {
                if let Some(session) = self.session.as_mut() {
                    session.set_frame(frame);
                }
                self.transition(CaptureState::FrameCaptured);
                Ok(())
            }
            Err(err) => {
                log::warn!("unreadable image file {}: {:#}", path.display(), err);
                self.discard_session();
                self.transition(CaptureState::Idle);
                Err(CaptureError::UnreadableFile(format!("{:#}", err)))
            }
        }
    }

    /// The captured still, if the session has one.
    pub fn frame(&self) -> Option<&EncodedFrame> {
        self.session.as_ref().and_then(|s| s.frame())
    }

    /// Hand the captured still off and end the session.
    pub fn take_frame(&mut self) -> Option<EncodedFrame> {
        if self.state != CaptureState::FrameCaptured {
            return None;
        }
        let frame = self.session.take().and_then(|mut s| s.frame.take());
        self.transition(CaptureState::Idle);
        frame
    }

    /// Back to `Idle`. The camera, if held, is released before this returns.
    pub fn reset(&mut self) {
        self.discard_session();
        self.transition(CaptureState::Idle);
    }

    fn discard_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release_device();
        }
    }

    fn transition(&mut self, next: CaptureState) {
        if self.state != next {
            log::debug!("capture: {} -> {}", self.state, next);
        }
        self.state = next;
    }

    fn invalid(&self, operation: &'static str) -> CaptureError {
        CaptureError::InvalidState {
            operation,
            state: self.state.clone(),
        }
    }
}

impl<S: FrameStream> Default for CaptureController<S> {
    fn default() -> Self {
        Self::new(Facing::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
