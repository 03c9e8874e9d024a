//! Synthetic camera (`stub://...`) for demos and tests.
//!
//! The device name scripts the outcome of `open`:
//! - `stub://denied`: refused with `PermissionDenied`
//! - `stub://missing`: refused with `DeviceNotFound`
//! - `stub://busy`: refused with `Other`
//! - `stub://blank`: granted, but the stream never yields a frame
//! - anything else: granted, deterministic gradient frames
//!
//! Acquisitions and releases are counted so callers can check that every
//! grant is paired with exactly one release.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::device::{CameraAccessError, CameraBackend, Facing, FrameStream};
use crate::frame::VideoFrame;

/// Configuration for a synthetic camera.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Simulated time spent in the permission prompt.
    pub grant_delay: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device: "stub://rear_camera".to_string(),
            width: 640,
            height: 480,
            grant_delay: Duration::ZERO,
        }
    }
}

/// Shared acquisition/release counters.
#[derive(Clone, Debug, Default)]
pub struct DeviceCounters {
    acquired: Arc<AtomicU64>,
    released: Arc<AtomicU64>,
}

impl DeviceCounters {
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Devices currently held.
    pub fn live(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    counters: DeviceCounters,
    scripted: Vec<CameraAccessError>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if !config.device.starts_with("stub://") {
            return Err(anyhow!(
                "synthetic camera requires a stub:// device, got {}",
                config.device
            ));
        }
        Ok(Self {
            config,
            counters: DeviceCounters::default(),
            scripted: Vec::new(),
        })
    }

    pub fn counters(&self) -> DeviceCounters {
        self.counters.clone()
    }

    /// Refuse the next `open` with `reason`, regardless of the device name.
    pub fn refuse_next(&mut self, reason: CameraAccessError) {
        self.scripted.push(reason);
    }

    fn scripted_outcome(&mut self) -> Option<CameraAccessError> {
        if !self.scripted.is_empty() {
            return Some(self.scripted.remove(0));
        }
        match self.config.device.as_str() {
            "stub://denied" => Some(CameraAccessError::PermissionDenied),
            "stub://missing" => Some(CameraAccessError::DeviceNotFound),
            "stub://busy" => Some(CameraAccessError::Other("device busy".to_string())),
            _ => None,
        }
    }
}

impl CameraBackend for SyntheticCamera {
    type Stream = SyntheticStream;

    async fn open(&mut self, facing: Facing) -> Result<SyntheticStream, CameraAccessError> {
        if !self.config.grant_delay.is_zero() {
            tokio::time::sleep(self.config.grant_delay).await;
        }
        if let Some(reason) = self.scripted_outcome() {
            log::debug!("synthetic camera {} refused: {}", self.config.device, reason);
            return Err(reason);
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "synthetic camera {} granted (facing={})",
            self.config.device,
            facing
        );
        Ok(SyntheticStream {
            name: self.config.device.clone(),
            width: self.config.width,
            height: self.config.height,
            blank: self.config.device == "stub://blank",
            frame_count: 0,
            stopped: false,
            counters: self.counters.clone(),
        })
    }
}

/// Stream handed out by `SyntheticCamera`.
pub struct SyntheticStream {
    name: String,
    width: u32,
    height: u32,
    blank: bool,
    frame_count: u64,
    stopped: bool,
    counters: DeviceCounters,
}

impl SyntheticStream {
    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl FrameStream for SyntheticStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn latest_frame(&mut self) -> Result<Option<VideoFrame>> {
        if self.stopped {
            return Err(anyhow!("synthetic stream {} already stopped", self.name));
        }
        if self.blank {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        VideoFrame::new(pixels, self.width, self.height).map(Some)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
