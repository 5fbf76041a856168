//! Strip selection and compositing.
//!
//! A strip is a fixed-size neighborhood of sampled frames around one center
//! frame. Positions past either end of the episode are clamped, so frames
//! near the edges appear more than once instead of being dropped.
//!
//! The selected frames are composited left-to-right into one image: each
//! frame is optionally downscaled, all frames are brought to the height of
//! the tallest one, and the results are pasted side by side without any
//! border.
//!
//! # Example
//!
//! ```
//! use handcontact::strip::build_strip;
//!
//! let frames = ["f0", "f10", "f20"];
//! let strip = build_strip(&frames, 0, 3)?;
//! assert_eq!(strip, [&"f0", &"f0", &"f10"]);
//! # Ok::<(), handcontact::AnnotationError>(())
//! ```

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GenericImage, codecs::jpeg::JpegEncoder, imageops::FilterType};

use crate::configuration::StripOptions;
use crate::error::AnnotationError;

/// MIME type of every encoded strip.
pub const STRIP_MIME_TYPE: &str = "image/jpeg";

/// Sampled-sequence positions that make up the strip around `center`.
///
/// Offsets run from `-(strip_size / 2)` to `strip_size - 1 - strip_size / 2`
/// and every position is clamped to `[0, len - 1]`. For odd sizes the center
/// sits exactly in the middle. For even sizes it is the
/// `strip_size / 2 + 1`-th element (1-indexed), one step toward the later
/// frames.
///
/// # Errors
///
/// Returns [`AnnotationError::InvalidStripSize`] for a zero size,
/// [`AnnotationError::EmptyEpisode`] when `len == 0`, and
/// [`AnnotationError::CenterOutOfRange`] when `center >= len`.
pub fn strip_positions(
    len: usize,
    center: usize,
    strip_size: usize,
) -> Result<Vec<usize>, AnnotationError> {
    if strip_size == 0 {
        return Err(AnnotationError::InvalidStripSize(strip_size));
    }
    if len == 0 {
        return Err(AnnotationError::EmptyEpisode);
    }
    if center >= len {
        return Err(AnnotationError::CenterOutOfRange {
            position: center,
            len,
        });
    }

    let half = strip_size / 2;
    let last = len - 1;
    Ok((0..strip_size)
        .map(|slot| (center + slot).saturating_sub(half).min(last))
        .collect())
}

/// Select the strip around `center` from an ordered frame list.
///
/// The returned vector always has exactly `strip_size` entries.
///
/// # Errors
///
/// Same as [`strip_positions`].
pub fn build_strip<T>(
    frames: &[T],
    center: usize,
    strip_size: usize,
) -> Result<Vec<&T>, AnnotationError> {
    Ok(strip_positions(frames.len(), center, strip_size)?
        .into_iter()
        .map(|position| &frames[position])
        .collect())
}

/// Index (0-based) of the center frame inside a strip of `strip_size`.
pub fn center_slot(strip_size: usize) -> usize {
    strip_size / 2
}

/// 1-indexed ordinal of the center frame, as shown to the labeling model.
pub fn center_ordinal(strip_size: usize) -> usize {
    center_slot(strip_size) + 1
}

/// A composited strip encoded for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStrip {
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub mime_type: &'static str,
    /// Width of the composited image in pixels.
    pub width: u32,
    /// Height of the composited image in pixels.
    pub height: u32,
}

/// Composite frames left-to-right into one RGB image.
///
/// Each frame is first downscaled by `scale` (when set and not `1.0`) to
/// `max(1, floor(w * scale)) × max(1, floor(h * scale))`. Frames shorter
/// than the tallest one are then resized to its height, keeping their aspect
/// ratio (`floor(w * max_h / h)`). The output width is the sum of the
/// resized widths and the height is the maximum height.
///
/// # Errors
///
/// Returns [`AnnotationError::EmptyEpisode`] for an empty slice and
/// [`AnnotationError::InvalidScale`] for a scale outside `(0, 1]`.
pub fn composite_strip(
    frames: &[DynamicImage],
    scale: Option<f32>,
) -> Result<DynamicImage, AnnotationError> {
    if frames.is_empty() {
        return Err(AnnotationError::EmptyEpisode);
    }

    let scaled: Vec<DynamicImage> = match scale {
        Some(ratio) if !(ratio > 0.0 && ratio <= 1.0) => {
            return Err(AnnotationError::InvalidScale(ratio));
        }
        Some(ratio) if ratio != 1.0 => frames
            .iter()
            .map(|frame| {
                let width = ((frame.width() as f64 * ratio as f64) as u32).max(1);
                let height = ((frame.height() as f64 * ratio as f64) as u32).max(1);
                frame.resize_exact(width, height, FilterType::Lanczos3)
            })
            .collect(),
        _ => frames.to_vec(),
    };

    let max_height = scaled.iter().map(DynamicImage::height).max().unwrap_or(1);

    let normalized: Vec<DynamicImage> = scaled
        .into_iter()
        .map(|frame| {
            if frame.height() == max_height || frame.height() == 0 {
                frame
            } else {
                let width = (frame.width() as u64 * max_height as u64 / frame.height() as u64)
                    .max(1) as u32;
                frame.resize_exact(width, max_height, FilterType::Lanczos3)
            }
        })
        .collect();

    let total_width: u32 = normalized.iter().map(DynamicImage::width).sum();
    let mut strip = DynamicImage::new_rgb8(total_width, max_height);

    let mut x = 0;
    for frame in &normalized {
        strip.copy_from(&DynamicImage::ImageRgb8(frame.to_rgb8()), x, 0)?;
        x += frame.width();
    }

    log::debug!(
        "Composited {} frame(s) into {}x{} strip",
        frames.len(),
        total_width,
        max_height
    );
    Ok(strip)
}

/// Encode an image as JPEG with the given quality.
///
/// # Errors
///
/// Returns [`AnnotationError::ImageError`] if encoding fails.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, AnnotationError> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    image.to_rgb8().write_with_encoder(encoder)?;
    Ok(buffer.into_inner())
}

/// Load the strip frames from disk, composite them, and encode the result.
///
/// # Errors
///
/// Returns [`AnnotationError::MissingFrame`] for the first path that does
/// not exist, or image/configuration errors.
pub fn render_strip<P: AsRef<Path>>(
    paths: &[P],
    options: &StripOptions,
) -> Result<EncodedStrip, AnnotationError> {
    options.validate()?;

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AnnotationError::MissingFrame {
                path: path.to_path_buf(),
            });
        }
        frames.push(image::open(path)?);
    }

    let strip = composite_strip(&frames, options.scale)?;
    Ok(EncodedStrip {
        bytes: encode_jpeg(&strip, options.jpeg_quality)?,
        mime_type: STRIP_MIME_TYPE,
        width: strip.width(),
        height: strip.height(),
    })
}
