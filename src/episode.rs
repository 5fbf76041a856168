//! Episode manifest.
//!
//! The sampler writes an `episodes_meta.json` manifest listing, per episode,
//! the task text and the sampled frames with their original indices and
//! file paths. The request encoder reads it back. The manifest is a plain
//! JSON array so it can be edited or filtered by hand before encoding.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AnnotationError;

/// File name of the manifest inside the frames directory.
pub const MANIFEST_FILE_NAME: &str = "episodes_meta.json";

/// One sampled frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Index in the original, unsampled video.
    pub frame_index: u64,
    /// Where the frame image is stored.
    pub path: PathBuf,
}

/// One episode and its sampled frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeFrames {
    /// Episode index.
    pub episode_index: u64,
    /// Task index in the dataset's task table.
    #[serde(default)]
    pub task_index: u64,
    /// Natural-language task description.
    pub task: String,
    /// Sampled frames, strictly increasing by `frame_index`.
    pub frames: Vec<FrameRecord>,
}

impl EpisodeFrames {
    /// Returns `true` if frame indices strictly increase.
    pub fn is_ordered(&self) -> bool {
        self.frames
            .windows(2)
            .all(|pair| pair[0].frame_index < pair[1].frame_index)
    }
}

/// The full manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeManifest {
    /// Episodes in the order they were sampled.
    pub episodes: Vec<EpisodeFrames>,
}

impl EpisodeManifest {
    /// Wrap a list of episodes.
    pub fn new(episodes: Vec<EpisodeFrames>) -> Self {
        Self { episodes }
    }

    /// Total number of sampled frames across all episodes.
    pub fn frame_count(&self) -> usize {
        self.episodes.iter().map(|episode| episode.frames.len()).sum()
    }

    /// Read a manifest from disk.
    ///
    /// # Errors
    ///
    /// Returns I/O or JSON errors, or [`AnnotationError::InvalidMetadata`]
    /// if an episode's frames are not strictly increasing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AnnotationError> {
        let path = path.as_ref();
        log::debug!("Loading episode manifest: {}", path.display());
        let text = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&text)?;

        if let Some(episode) = manifest.episodes.iter().find(|episode| !episode.is_ordered()) {
            return Err(AnnotationError::InvalidMetadata {
                path: path.to_path_buf(),
                reason: format!(
                    "frames of episode {} are not strictly increasing",
                    episode.episode_index
                ),
            });
        }
        Ok(manifest)
    }

    /// Write the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns I/O or JSON errors.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AnnotationError> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        fs::write(path, text)?;
        Ok(())
    }
}
