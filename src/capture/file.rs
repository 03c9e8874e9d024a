//! File-input path: a user-chosen image file becomes an `EncodedFrame`.
//!
//! Only image media types are accepted. The extension is checked first so
//! obviously wrong picks fail fast, then the payload itself must decode.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;

use crate::frame::EncodedFrame;

/// Upper bound on accepted file size.
pub const MAX_IMAGE_FILE_BYTES: u64 = 32 * 1024 * 1024;

/// Read and decode an image file into the still contract.
pub fn read_image_file(path: &Path) -> Result<EncodedFrame> {
    if let Some(ext) = path.extension() {
        if ImageFormat::from_extension(ext).is_none() {
            return Err(anyhow!(
                "{} is not an image file (extension {:?})",
                path.display(),
                ext
            ));
        }
    }
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if !meta.is_file() {
        return Err(anyhow!("{} is not a regular file", path.display()));
    }
    if meta.len() > MAX_IMAGE_FILE_BYTES {
        return Err(anyhow!(
            "{} is too large ({} bytes, limit {})",
            path.display(),
            meta.len(),
            MAX_IMAGE_FILE_BYTES
        ));
    }
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    EncodedFrame::from_image_bytes(&data).with_context(|| format!("decode {}", path.display()))
}
