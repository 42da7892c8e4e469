//! Photo preparation: size ceiling, scale-down, JPEG re-encode.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::config::PhotoConfig;
use crate::error::{SurveyError, SurveyResult};
use crate::models::PhotoAttachment;

// ---

/// Validate and shrink one attachment, returning JPEG bytes ready to write.
///
/// The size ceiling is checked on the raw blob before any decoding.
pub fn prepare_photo(photo: &PhotoAttachment, cfg: &PhotoConfig) -> SurveyResult<Vec<u8>> {
    // ---
    let slot = photo.slot;
    if photo.len() > cfg.max_bytes {
        return Err(SurveyError::OversizeAttachment {
            slot,
            size: photo.len(),
            limit: cfg.max_bytes,
        });
    }

    let img = image::load_from_memory(&photo.bytes)
        .map_err(|source| SurveyError::Image { slot, source })?;

    let width = scaled(img.width(), cfg.scale);
    let height = scaled(img.height(), cfg.scale);
    let resized = img.resize_exact(width, height, FilterType::Triangle).to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, cfg.jpeg_quality)
        .encode_image(&resized)
        .map_err(|source| SurveyError::Image { slot, source })?;

    tracing::debug!(
        %slot,
        from = %format!("{}x{}", img.width(), img.height()),
        to = %format!("{width}x{height}"),
        bytes_in = photo.len(),
        bytes_out = out.len(),
        "photo re-encoded"
    );
    Ok(out)
}

fn scaled(px: u32, scale: f32) -> u32 {
    ((px as f32 * scale) as u32).max(1)
}
