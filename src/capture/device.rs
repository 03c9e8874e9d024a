//! Camera device seam.
//!
//! A `CameraBackend` grants exclusive access to one video capture device and
//! hands back a `FrameStream`. The stream is wrapped in a `DeviceHandle`
//! immediately, and the handle is the only owner: releasing happens when the
//! handle is released or dropped, whichever comes first, and happens once.

use std::fmt;
use std::future::Future;

use anyhow::Result;

use crate::frame::VideoFrame;

/// Preferred camera orientation. Backends treat it as a hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Facing {
    #[default]
    Rear,
    Front,
}

impl Facing {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rear" | "back" | "environment" => Some(Facing::Rear),
            "front" | "user" => Some(Facing::Front),
            _ => None,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Rear => write!(f, "rear"),
            Facing::Front => write!(f, "front"),
        }
    }
}

/// Why a camera could not be acquired (or failed while held).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraAccessError {
    PermissionDenied,
    DeviceNotFound,
    Other(String),
}

impl CameraAccessError {
    /// Actionable text for the person holding the device.
    pub fn user_message(&self) -> &'static str {
        match self {
            CameraAccessError::PermissionDenied => {
                "Camera access was denied. Allow camera access for this app in your system \
                 settings, then try again, or choose a photo from your files instead."
            }
            CameraAccessError::DeviceNotFound => {
                "No camera was found. Connect a camera and try again, or choose a photo from \
                 your files instead."
            }
            CameraAccessError::Other(_) => {
                "The camera could not be started. Close other apps that may be using it and \
                 try again."
            }
        }
    }
}

impl fmt::Display for CameraAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraAccessError::PermissionDenied => write!(f, "camera permission denied"),
            CameraAccessError::DeviceNotFound => write!(f, "camera device not found"),
            CameraAccessError::Other(detail) => write!(f, "camera error: {}", detail),
        }
    }
}

impl std::error::Error for CameraAccessError {}

/// Live frame source of an acquired camera.
pub trait FrameStream {
    /// Device identifier, for logs.
    fn name(&self) -> &str;

    /// Most recent frame, or `None` if the device has not produced one yet.
    fn latest_frame(&mut self) -> Result<Option<VideoFrame>>;

    /// Stop streaming and give the device back to the system.
    fn stop(&mut self);
}

/// Grants exclusive access to a capture device.
pub trait CameraBackend {
    type Stream: FrameStream;

    /// Ask for the device. Resolves once access is granted or refused; the
    /// caller is suspended meanwhile.
    fn open(
        &mut self,
        facing: Facing,
    ) -> impl Future<Output = Result<Self::Stream, CameraAccessError>>;
}

/// Sole owner of an acquired camera stream.
///
/// Not `Clone`, so a camera can never be held twice through copies:
///
/// ```compile_fail
/// use waste_sorter::capture::{DeviceHandle, SyntheticStream};
///
/// fn duplicate(handle: &DeviceHandle<SyntheticStream>) -> DeviceHandle<SyntheticStream> {
///     handle.clone()
/// }
/// ```
pub struct DeviceHandle<S: FrameStream> {
    stream: Option<S>,
}

impl<S: FrameStream> DeviceHandle<S> {
    pub(crate) fn new(stream: S) -> Self {
        log::info!("camera acquired: {}", stream.name());
        Self {
            stream: Some(stream),
        }
    }

    pub fn name(&self) -> &str {
        self.stream.as_ref().map(|s| s.name()).unwrap_or("<released>")
    }

    pub(crate) fn latest_frame(&mut self) -> Result<Option<VideoFrame>> {
        match self.stream.as_mut() {
            Some(stream) => stream.latest_frame(),
            None => Ok(None),
        }
    }

    /// Stop the device now.
    pub fn release(mut self) {
        self.stop_stream();
    }

    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            log::info!("camera released: {}", stream.name());
        }
    }
}

impl<S: FrameStream> Drop for DeviceHandle<S> {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

impl<S: FrameStream> fmt::Debug for DeviceHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.name())
            .finish()
    }
}
