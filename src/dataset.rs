//! Local dataset layout.
//!
//! Reads a LeRobot-style dataset snapshot from disk:
//!
//! ```text
//! <root>/
//!     meta/episodes.jsonl
//!     meta/tasks.jsonl
//!     videos/chunk-000/observation.images.cam_third/episode_000000.mp4
//!     ...
//! ```
//!
//! Episodes are grouped into chunks of [`DEFAULT_CHUNK_SIZE`]; the chunk
//! number is part of each video path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::AnnotationError;

/// Episodes per video chunk directory.
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// Camera whose videos are sampled by default.
pub const DEFAULT_CAMERA_KEY: &str = "observation.images.cam_third";

/// Task text used when an episode's task cannot be resolved.
pub const UNKNOWN_TASK: &str = "unknown task";

/// One line of `meta/episodes.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EpisodeEntry {
    /// Episode index.
    pub episode_index: u64,
    /// Index into `meta/tasks.jsonl`.
    #[serde(default)]
    pub task_index: Option<u64>,
    /// Task strings listed inline, if any.
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    task_index: u64,
    task: String,
}

/// Paths and lookups for a dataset snapshot on disk.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
    camera_key: String,
    chunk_size: u64,
}

impl DatasetLayout {
    /// Layout rooted at `root` with the default camera and chunk size.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            camera_key: DEFAULT_CAMERA_KEY.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sample a different camera stream.
    #[must_use]
    pub fn with_camera_key(mut self, camera_key: impl Into<String>) -> Self {
        self.camera_key = camera_key.into();
        self
    }

    /// Override the chunk size. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Dataset root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chunk number holding `episode_index`.
    pub fn episode_chunk(&self, episode_index: u64) -> u64 {
        episode_index / self.chunk_size
    }

    /// Path of the camera video for `episode_index`.
    pub fn video_path(&self, episode_index: u64) -> PathBuf {
        self.root
            .join("videos")
            .join(format!("chunk-{:03}", self.episode_chunk(episode_index)))
            .join(&self.camera_key)
            .join(format!("episode_{episode_index:06}.mp4"))
    }

    /// Read `meta/episodes.jsonl`, keeping at most `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns I/O errors or [`AnnotationError::InvalidMetadata`] naming
    /// the first bad line.
    pub fn episodes(&self, limit: Option<usize>) -> Result<Vec<EpisodeEntry>, AnnotationError> {
        let mut episodes: Vec<EpisodeEntry> =
            read_json_lines(&self.root.join("meta").join("episodes.jsonl"))?;
        if let Some(limit) = limit {
            episodes.truncate(limit);
        }
        Ok(episodes)
    }

    /// Read `meta/tasks.jsonl` into a task-index → text map.
    ///
    /// A missing file yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns I/O errors or [`AnnotationError::InvalidMetadata`].
    pub fn tasks(&self) -> Result<BTreeMap<u64, String>, AnnotationError> {
        let path = self.root.join("meta").join("tasks.jsonl");
        if !path.exists() {
            log::warn!("No task table at {}", path.display());
            return Ok(BTreeMap::new());
        }
        let entries: Vec<TaskEntry> = read_json_lines(&path)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.task_index, entry.task))
            .collect())
    }
}

/// Resolve the task text for an episode.
///
/// Uses the task index (default 0) when the task table has it, then the
/// first inline task, then [`UNKNOWN_TASK`].
pub fn resolve_task(entry: &EpisodeEntry, tasks: &BTreeMap<u64, String>) -> String {
    tasks
        .get(&entry.task_index.unwrap_or(0))
        .or_else(|| entry.tasks.first())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_TASK.to_string())
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AnnotationError> {
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
