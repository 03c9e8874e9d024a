//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. `/dev/video0`), negotiates packed RGB at
//! the preferred size, and streams through mmap buffers. V4L2 has no notion
//! of facing, so the hint is only logged.
//!
//! Open failures are classified from the OS error: `EACCES`/`EPERM` mean the
//! user lacks access to the node, `ENOENT`/`ENODEV` mean there is no device.

use std::io;

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::device::{CameraAccessError, CameraBackend, Facing, FrameStream};
use crate::frame::VideoFrame;

/// Configuration for a V4L2 camera.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

pub struct V4l2Camera {
    config: V4l2Config,
}

impl V4l2Camera {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }

    fn open_device(&self) -> Result<V4l2Stream, CameraAccessError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device).map_err(classify_open_error)?;
        let mut format = device.format().map_err(classify_open_error)?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device.format().map_err(classify_open_error)?
            }
        };
        if &format.fourcc.repr != b"RGB3" {
            return Err(CameraAccessError::Other(format!(
                "{} does not support packed RGB (offers {})",
                self.config.device, format.fourcc
            )));
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(classify_open_error)?;

        Ok(V4l2Stream {
            name: self.config.device.clone(),
            width: format.width,
            height: format.height,
            state: Some(state),
        })
    }
}

impl CameraBackend for V4l2Camera {
    type Stream = V4l2Stream;

    async fn open(&mut self, facing: Facing) -> Result<V4l2Stream, CameraAccessError> {
        log::debug!(
            "V4l2Camera: opening {} (facing hint {} ignored)",
            self.config.device,
            facing
        );
        let stream = self.open_device()?;
        log::info!(
            "V4l2Camera: streaming {} ({}x{})",
            stream.name,
            stream.width,
            stream.height
        );
        Ok(stream)
    }
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Stream {
    name: String,
    width: u32,
    height: u32,
    state: Option<V4l2State>,
}

impl FrameStream for V4l2Stream {
    fn name(&self) -> &str {
        &self.name
    }

    fn latest_frame(&mut self) -> Result<Option<VideoFrame>> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let (buf, meta) = state
            .with_mut(|fields| fields.stream.next())
            .context("capture v4l2 frame")?;
        let used = meta.bytesused as usize;
        if used == 0 {
            return Ok(None);
        }
        let expected = (self.width as usize) * (self.height as usize) * 3;
        let len = used.min(buf.len());
        if len < expected {
            log::debug!(
                "V4l2Camera: short frame from {} ({} of {} bytes)",
                self.name,
                len,
                expected
            );
            return Ok(None);
        }
        VideoFrame::new(buf[..expected].to_vec(), self.width, self.height).map(Some)
    }

    fn stop(&mut self) {
        // Dropping the mmap stream issues STREAMOFF; dropping the device closes the node.
        self.state = None;
    }
}

fn classify_open_error(err: io::Error) -> CameraAccessError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => return CameraAccessError::PermissionDenied,
        io::ErrorKind::NotFound => return CameraAccessError::DeviceNotFound,
        _ => {}
    }
    match err.raw_os_error() {
        Some(code) if code == libc::EACCES || code == libc::EPERM => {
            CameraAccessError::PermissionDenied
        }
        Some(code) if code == libc::ENOENT || code == libc::ENODEV || code == libc::ENXIO => {
            CameraAccessError::DeviceNotFound
        }
        _ => CameraAccessError::Other(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_errors_map_to_reasons() {
        assert_eq!(
            classify_open_error(io::Error::from_raw_os_error(libc::EACCES)),
            CameraAccessError::PermissionDenied
        );
        assert_eq!(
            classify_open_error(io::Error::from_raw_os_error(libc::ENODEV)),
            CameraAccessError::DeviceNotFound
        );
        assert!(matches!(
            classify_open_error(io::Error::from_raw_os_error(libc::EBUSY)),
            CameraAccessError::Other(_)
        ));
    }

    #[tokio::test]
    async fn missing_node_is_device_not_found() {
        let mut camera = V4l2Camera::new(V4l2Config {
            device: "/dev/waste-sorter-no-such-video".to_string(),
            ..V4l2Config::default()
        });
        assert_eq!(
            camera.open(Facing::Rear).await.err(),
            Some(CameraAccessError::DeviceNotFound)
        );
    }
}
