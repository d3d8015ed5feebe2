//! Thumbnail derivation for captured photos.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use scope_core::{Result, ScopeError};
use serde::{Deserialize, Serialize};

/// Longest thumbnail side, in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 200;
/// Thumbnail JPEG quality.
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 70;

/// Thumbnail bounds and encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSpec {
    pub max_side: u32,
    pub quality: u8,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_THUMBNAIL_SIZE,
            quality: DEFAULT_THUMBNAIL_QUALITY,
        }
    }
}

/// Decode a base64 JPEG, shrink it to fit `spec` (aspect preserved, never
/// upscaled) and return it re-encoded as base64 JPEG.
pub fn generate_thumbnail(photo_b64: &str, spec: ThumbnailSpec) -> Result<String> {
    let bytes = STANDARD.decode(photo_b64.trim())?;
    let img = image::load_from_memory(&bytes).map_err(|e| ScopeError::Thumbnail(e.to_string()))?;

    let max = spec.max_side.max(1);
    let img = if img.width() > max || img.height() > max {
        img.thumbnail(max, max)
    } else {
        img
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, spec.quality.clamp(1, 100))
        .encode_image(&img.to_rgb8())
        .map_err(|e| ScopeError::Thumbnail(e.to_string()))?;
    Ok(STANDARD.encode(out))
}
