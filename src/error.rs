//! Error types for the `handcontact` crate.
//!
//! This module defines [`AnnotationError`], the unified error type returned by
//! all fallible operations in the crate. Per-record problems found while
//! reconciling batch output are *not* errors: they become placeholder labels
//! and counters in the [`ReconcileReport`](crate::ReconcileReport). Only
//! failures that stop a whole stage surface here.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use serde_json::Error as JsonError;
use thiserror::Error;

use crate::batch::BatchStatus;

/// The unified error type for all `handcontact` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnnotationError {
    /// An episode video could not be opened.
    #[error("Failed to open video at {path}: {reason}")]
    FileOpen {
        /// Path of the video that was passed to the sampler.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// A sampling step of zero was provided.
    #[error("Sampling step must be greater than zero")]
    InvalidInterval,

    /// A strip must contain at least one frame.
    #[error("Invalid strip size {0}: must be at least 1")]
    InvalidStripSize(usize),

    /// The downscale ratio is outside `(0, 1]`.
    #[error("Invalid scale {0}: must satisfy 0 < scale <= 1")]
    InvalidScale(f32),

    /// A strip was requested from an episode with no sampled frames.
    #[error("Cannot build a strip from an empty frame list")]
    EmptyEpisode,

    /// The strip center lies outside the sampled frame list.
    #[error("Center position {position} is out of range (episode has {len} sampled frames)")]
    CenterOutOfRange {
        /// The requested center position.
        position: usize,
        /// Number of sampled frames in the episode.
        len: usize,
    },

    /// A frame referenced by a strip has no backing file.
    #[error("Missing frame file: {}", path.display())]
    MissingFrame {
        /// Path of the missing image.
        path: PathBuf,
    },

    /// An episode or frame index does not fit the six-digit identifier.
    #[error("{field} {value} does not fit in a six-digit work unit identifier")]
    IdentifierOutOfRange {
        /// Which half of the identifier overflowed (`"episode"` or `"frame"`).
        field: &'static str,
        /// The rejected value.
        value: u64,
    },

    /// A string could not be decoded as a work unit identifier.
    #[error("Invalid work unit identifier: {0:?}")]
    InvalidIdentifier(String),

    /// An inline image payload was not a base64 data URL.
    #[error("Invalid image data URL: {0}")]
    InvalidDataUrl(String),

    /// A dataset metadata file is structurally wrong.
    #[error("Invalid dataset metadata in {}: {reason}", path.display())]
    InvalidMetadata {
        /// The offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// No API key was configured for the batch service.
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    /// The batch job has not finished yet.
    #[error("Batch {id} is not completed yet (status={status})")]
    BatchNotReady {
        /// Batch job identifier.
        id: String,
        /// Status reported by the service.
        status: BatchStatus,
    },

    /// The batch job ended without producing any output.
    #[error("Batch {id} finished with status {status} and has no output file")]
    UpstreamJobFailed {
        /// Batch job identifier.
        id: String,
        /// Terminal status reported by the service.
        status: BatchStatus,
    },

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while loading or compositing frames.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] JsonError),

    /// The batch service could not be reached or rejected the request.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<FfmpegError> for AnnotationError {
    fn from(error: FfmpegError) -> Self {
        AnnotationError::FfmpegError(error.to_string())
    }
}
