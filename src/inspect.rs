//! Batch input inspection.
//!
//! Reads a batch JSONL back and pulls out what a reviewer wants to check by
//! eye: the identifier, the prompts, and the strip image that was inlined.

use std::fs;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::custom_id::WorkUnitId;
use crate::error::AnnotationError;
use crate::request::{ContentPart, MessageContent, WorkUnit};

/// Parse every non-blank line of a batch input file.
///
/// # Errors
///
/// Returns I/O errors or [`AnnotationError::InvalidMetadata`] naming the
/// first line that is not a work unit.
pub fn read_work_units<P: AsRef<Path>>(path: P) -> Result<Vec<WorkUnit>, AnnotationError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|error| AnnotationError::InvalidMetadata {
                path: path.to_path_buf(),
                reason: format!("line {}: {error}", number + 1),
            })
        })
        .collect()
}

/// Split a `data:{mime};base64,{payload}` URL into MIME type and bytes.
///
/// # Errors
///
/// Returns [`AnnotationError::InvalidDataUrl`] if the URL is not a base64
/// data URL or the payload does not decode.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), AnnotationError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| AnnotationError::InvalidDataUrl("missing data: scheme".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| AnnotationError::InvalidDataUrl("missing payload".to_string()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| AnnotationError::InvalidDataUrl("payload is not base64".to_string()))?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|error| AnnotationError::InvalidDataUrl(error.to_string()))?;
    Ok((mime_type.to_string(), bytes))
}

/// Human-readable view of one work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    /// Raw `custom_id`.
    pub custom_id: String,
    /// Decoded identifier, if the `custom_id` is well formed.
    pub id: Option<WorkUnitId>,
    /// Model the unit targets.
    pub model: String,
    /// System prompt text.
    pub system_text: String,
    /// User instruction text.
    pub user_text: String,
    /// MIME type of the inlined strip.
    pub image_mime: Option<String>,
    /// Decoded strip bytes.
    pub image_bytes: Option<Vec<u8>>,
}

impl RequestSummary {
    /// Summarize a work unit, decoding its inline image.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::InvalidDataUrl`] if the image part is not
    /// a base64 data URL.
    pub fn from_work_unit(unit: &WorkUnit) -> Result<Self, AnnotationError> {
        let mut summary = Self {
            custom_id: unit.custom_id.clone(),
            id: unit.custom_id.parse().ok(),
            model: unit.body.model.clone(),
            system_text: String::new(),
            user_text: String::new(),
            image_mime: None,
            image_bytes: None,
        };

        for message in &unit.body.messages {
            match (&message.content, message.role.as_str()) {
                (MessageContent::Text(text), "system") => summary.system_text.push_str(text),
                (MessageContent::Text(text), _) => summary.user_text.push_str(text),
                (MessageContent::Parts(parts), _) => {
                    for part in parts {
                        match part {
                            ContentPart::Text { text } => summary.user_text.push_str(text),
                            ContentPart::ImageUrl { image_url } => {
                                let (mime, bytes) = decode_data_url(&image_url.url)?;
                                summary.image_mime = Some(mime);
                                summary.image_bytes = Some(bytes);
                            }
                        }
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Size of the decoded strip in bytes.
    pub fn image_len(&self) -> usize {
        self.image_bytes.as_ref().map_or(0, Vec::len)
    }
}
