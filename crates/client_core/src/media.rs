use std::io::Cursor;

use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use shared::domain::{ConversationKey, MessageKind};
use uuid::Uuid;

use crate::error::MediaError;

pub const MAX_IMAGE_SIDE: u32 = 1280;
pub const JPEG_QUALITY: u8 = 75;
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Scales `(width, height)` so the longest side is at most `max_side`.
pub fn target_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }
    let scale = f64::from(max_side) / f64::from(longest);
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Re-encodes any supported image as a JPEG no larger than [`MAX_IMAGE_SIDE`].
pub fn compress_image(bytes: &[u8]) -> Result<Vec<u8>, MediaError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|err| MediaError::Decode(err.to_string()))?;
    let (width, height) = target_dimensions(decoded.width(), decoded.height(), MAX_IMAGE_SIDE);
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|err| MediaError::Encode(err.to_string()))?;
    Ok(out.into_inner())
}

/// `<conversation>/<kind>/<yyyy-mm-dd>/<uuid>.jpg`
pub fn object_path(conversation: &ConversationKey, kind: MessageKind, at: DateTime<Utc>) -> String {
    format!(
        "{conversation}/{}/{}/{}.jpg",
        kind.as_str(),
        at.format("%Y-%m-%d"),
        Uuid::new_v4()
    )
}

#[cfg(test)]
#[path = "tests/media_tests.rs"]
mod tests;
