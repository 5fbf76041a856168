//! Batch request encoding.
//!
//! Turns each strip into a [`WorkUnit`]: a self-contained JSON record with
//! the prompt, the composited strip inlined as a base64 data URL, and the
//! strict response schema. Units are independent of one another, so the
//! batch service may process them in any order.
//!
//! [`write_batch`] walks an [`EpisodeManifest`], builds one unit per sampled
//! frame, and writes them as JSON lines. A unit whose strip references a
//! missing frame file is skipped and recorded in the [`BuildReport`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::configuration::{PipelineOptions, RequestOptions};
use crate::custom_id::WorkUnitId;
use crate::episode::{EpisodeFrames, EpisodeManifest};
use crate::error::AnnotationError;
use crate::progress::{OperationType, ProgressTracker};
use crate::prompt;
use crate::strip::{build_strip, render_strip};

/// Endpoint every work unit targets.
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

/// One line of the batch input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// `ep{episode:06}_fr{frame:06}` identifier echoed back by the service.
    pub custom_id: String,
    /// Always `"POST"`.
    pub method: String,
    /// Always [`CHAT_COMPLETIONS_ENDPOINT`].
    pub url: String,
    /// Chat completion request body.
    pub body: RequestBody,
}

/// Chat completion request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    /// Model identifier.
    pub model: String,
    /// System message followed by the user message.
    pub messages: Vec<ChatMessage>,
    /// Strict JSON schema the answer must follow.
    pub response_format: Value,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"system"` or `"user"`.
    pub role: String,
    /// Plain text or a list of content parts.
    pub content: MessageContent,
}

/// Message content: plain text for the system message, parts for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Image and text parts.
    Parts(Vec<ContentPart>),
}

/// One part of a multi-part user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// An inline image.
    ImageUrl {
        /// The image reference.
        image_url: ImageUrl,
    },
    /// Instruction text.
    Text {
        /// The text.
        text: String,
    },
}

/// Inline image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `data:{mime};base64,{payload}`.
    pub url: String,
    /// Resolution hint.
    pub detail: ImageDetail,
}

/// Resolution hint for the labeling model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    /// Low-resolution pass.
    Low,
    /// High-resolution pass. This is the default.
    #[default]
    High,
    /// Let the service decide.
    Auto,
}

/// Build a `data:` URL for an inline image payload.
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// Assemble a work unit from an already-encoded strip image.
///
/// This is a pure transform: nothing is read or written.
pub fn work_unit(
    id: WorkUnitId,
    mime_type: &str,
    image_bytes: &[u8],
    task: &str,
    options: &RequestOptions,
) -> WorkUnit {
    let strip_size = options.strip.strip_size;
    WorkUnit {
        custom_id: id.to_string(),
        method: "POST".to_string(),
        url: CHAT_COMPLETIONS_ENDPOINT.to_string(),
        body: RequestBody {
            model: options.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: MessageContent::Text(prompt::system_message(
                        strip_size,
                        &options.robot_description,
                    )),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: MessageContent::Parts(vec![
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: data_url(mime_type, image_bytes),
                                detail: options.detail,
                            },
                        },
                        ContentPart::Text {
                            text: prompt::user_message(task, strip_size),
                        },
                    ]),
                },
            ],
            response_format: prompt::response_format(),
        },
    }
}

/// Render the strip from its frame files and encode one work unit.
///
/// `strip_paths` must already be the clamped strip (see
/// [`build_strip`](crate::strip::build_strip)).
///
/// # Errors
///
/// Returns [`AnnotationError::MissingFrame`] if any strip file is absent,
/// [`AnnotationError::IdentifierOutOfRange`] for oversized indices, or
/// image errors.
pub fn encode_work_unit<P: AsRef<Path>>(
    episode_index: u64,
    center_frame_index: u64,
    strip_paths: &[P],
    task: &str,
    options: &RequestOptions,
) -> Result<WorkUnit, AnnotationError> {
    let id = WorkUnitId::new(episode_index, center_frame_index)?;
    let strip = render_strip(strip_paths, &options.strip)?;
    Ok(work_unit(id, strip.mime_type, &strip.bytes, task, options))
}

/// A center frame whose unit was not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    /// Identifier the unit would have had.
    pub id: WorkUnitId,
    /// Strip frame files that were missing.
    pub missing: Vec<PathBuf>,
}

/// Outcome of a batch build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Episodes visited.
    pub episodes: usize,
    /// Sampled frames visited (candidate centers).
    pub frames: usize,
    /// Work units written.
    pub written: usize,
    /// Units skipped because of missing frame files.
    pub skipped: Vec<SkippedUnit>,
}

/// Encode every center frame of one episode.
///
/// Returns the units in sampled order plus the centers that were skipped
/// because a strip file is missing. Any other error aborts the episode.
///
/// # Errors
///
/// Returns strip-layout, identifier, or image errors, and
/// [`AnnotationError::Cancelled`] if the pipeline token fires.
pub fn build_episode_units(
    episode: &EpisodeFrames,
    options: &RequestOptions,
    pipeline: &PipelineOptions,
) -> Result<(Vec<WorkUnit>, Vec<SkippedUnit>), AnnotationError> {
    encode_episode(episode, options, pipeline, None)
}

/// Shared by the serial and parallel batch builders; `tracker` advances
/// once per center frame, whichever thread encodes it.
pub(crate) fn encode_episode(
    episode: &EpisodeFrames,
    options: &RequestOptions,
    pipeline: &PipelineOptions,
    tracker: Option<&Mutex<ProgressTracker>>,
) -> Result<(Vec<WorkUnit>, Vec<SkippedUnit>), AnnotationError> {
    options.strip.validate()?;

    let mut units = Vec::with_capacity(episode.frames.len());
    let mut skipped = Vec::new();

    for (position, center) in episode.frames.iter().enumerate() {
        if pipeline.is_cancelled() {
            return Err(AnnotationError::Cancelled);
        }

        let id = WorkUnitId::new(episode.episode_index, center.frame_index)?;
        let strip = build_strip(&episode.frames, position, options.strip.strip_size)?;

        let missing: Vec<PathBuf> = strip
            .iter()
            .filter(|frame| !frame.path.exists())
            .map(|frame| frame.path.clone())
            .collect();
        if !missing.is_empty() {
            for path in &missing {
                log::warn!("{id}: missing frame {}", path.display());
            }
            skipped.push(SkippedUnit { id, missing });
            advance(tracker, episode.episode_index, center.frame_index);
            continue;
        }

        let paths: Vec<&Path> = strip.iter().map(|frame| frame.path.as_path()).collect();
        let rendered = render_strip(&paths, &options.strip)?;
        units.push(work_unit(
            id,
            rendered.mime_type,
            &rendered.bytes,
            &episode.task,
            options,
        ));
        advance(tracker, episode.episode_index, center.frame_index);
    }

    log::debug!(
        "Episode {}: {} unit(s), {} skipped",
        episode.episode_index,
        units.len(),
        skipped.len()
    );
    Ok((units, skipped))
}

fn advance(tracker: Option<&Mutex<ProgressTracker>>, episode_index: u64, frame_index: u64) {
    if let Some(Ok(mut tracker)) = tracker.map(Mutex::lock) {
        tracker.advance(Some(episode_index), Some(frame_index));
    }
}

/// Build the whole batch and write it as JSON lines.
///
/// Units are written in manifest episode order, then sampled frame order.
/// With the `rayon` feature, episodes are rendered in parallel; the written
/// output is identical either way.
///
/// # Errors
///
/// Returns the first non-skippable encoding error, I/O errors from
/// `writer`, or [`AnnotationError::Cancelled`].
pub fn write_batch<W: Write>(
    manifest: &EpisodeManifest,
    options: &RequestOptions,
    pipeline: &PipelineOptions,
    writer: &mut W,
) -> Result<BuildReport, AnnotationError> {
    options.strip.validate()?;

    let total = manifest.frame_count() as u64;
    let tracker = Mutex::new(ProgressTracker::new(
        pipeline.progress.clone(),
        OperationType::RequestBuilding,
        Some(total),
        pipeline.batch_size,
    ));
    let mut report = BuildReport {
        episodes: manifest.episodes.len(),
        frames: manifest.frame_count(),
        ..BuildReport::default()
    };

    #[cfg(feature = "rayon")]
    for (units, skipped) in
        crate::rayon::build_episodes_parallel(manifest, options, pipeline, &tracker)?
    {
        write_units(writer, &units)?;
        report.written += units.len();
        report.skipped.extend(skipped);
    }

    #[cfg(not(feature = "rayon"))]
    for episode in &manifest.episodes {
        let (units, skipped) = encode_episode(episode, options, pipeline, Some(&tracker))?;
        write_units(writer, &units)?;
        report.written += units.len();
        report.skipped.extend(skipped);
    }

    writer.flush()?;
    if let Ok(mut tracker) = tracker.lock() {
        tracker.finish();
    }
    Ok(report)
}

fn write_units<W: Write>(writer: &mut W, units: &[WorkUnit]) -> Result<(), AnnotationError> {
    for unit in units {
        serde_json::to_writer(&mut *writer, unit)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
