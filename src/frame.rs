//! Still-image contract shared by every capture path.
//!
//! - `VideoFrame`: one raw RGB8 sample pulled from a live camera stream.
//! - `EncodedFrame`: the encoded byte buffer handed to classification.
//!
//! Both the camera path and the file path end in an `EncodedFrame` holding
//! JPEG bytes at the source's native resolution. No resizing, cropping or
//! colour work happens here; format conversion is the only transformation.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageFormat};

/// JPEG quality used when encoding stills.
pub const JPEG_QUALITY: u8 = 92;

/// MIME type of every `EncodedFrame` payload.
pub const FRAME_MIME: &str = "image/jpeg";

/// One raw frame sampled from a live stream (packed RGB8, row-major).
#[derive(Debug)]
pub struct VideoFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if width == 0 || height == 0 {
            return Err(anyhow!("video frame has zero dimension {}x{}", width, height));
        }
        if pixels.len() != expected {
            return Err(anyhow!(
                "video frame size mismatch: expected {} bytes for {}x{} RGB8, got {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Encode this sample into a still at its native resolution.
    pub fn encode(&self) -> Result<EncodedFrame> {
        let mut bytes = Vec::with_capacity(self.pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
            .encode(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode video frame as jpeg")?;
        Ok(EncodedFrame {
            bytes,
            width: self.width,
            height: self.height,
        })
    }
}

/// Encoded still image (JPEG). Set once per capture session and never mutated.
///
/// `Clone` exists so the same still can be resubmitted; there is no mutable
/// access to the bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl EncodedFrame {
    /// Decode an arbitrary image file payload and re-encode it as JPEG.
    ///
    /// Only image media types are accepted; anything `image` cannot identify
    /// as a raster format is rejected before decoding.
    pub fn from_image_bytes(data: &[u8]) -> Result<Self> {
        let format = image::guess_format(data).context("payload is not a recognised image")?;
        if format == ImageFormat::Jpeg {
            let decoded = image::load_from_memory_with_format(data, format)
                .context("decode jpeg payload")?;
            let (width, height) = decoded.dimensions();
            return Ok(Self {
                bytes: data.to_vec(),
                width,
                height,
            });
        }
        let decoded = image::load_from_memory_with_format(data, format)
            .with_context(|| format!("decode {:?} payload", format))?;
        Self::from_dynamic(decoded)
    }

    fn from_dynamic(image: DynamicImage) -> Result<Self> {
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        let frame = VideoFrame::new(rgb.into_raw(), width, height)?;
        frame.encode()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mime(&self) -> &'static str {
        FRAME_MIME
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
