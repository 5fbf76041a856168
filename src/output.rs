//! Annotation output files.
//!
//! Three views of one [`AnnotationSet`], all rendered from the same
//! in-memory data so they always agree:
//!
//! ```text
//! <out_dir>/
//!     episodes_contact.json        combined, every episode
//!     episode_000000_contact.json  one per episode
//!     ...
//!     summary.csv                  one row per (episode, frame)
//! ```
//!
//! Output is deterministic: writing the same set twice produces
//! byte-identical files.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AnnotationError;
use crate::label::AnnotatedFrame;
use crate::reconcile::{AnnotationSet, EpisodeAnnotations};

/// Combined JSON file name.
pub const COMBINED_FILE_NAME: &str = "episodes_contact.json";

/// Summary CSV file name.
pub const SUMMARY_FILE_NAME: &str = "summary.csv";

/// Columns of the summary CSV, in order.
pub const SUMMARY_COLUMNS: [&str; 7] = [
    "episode_index",
    "frame_index",
    "left_hand_contact",
    "right_hand_contact",
    "contact_object",
    "confidence",
    "reason",
];

/// Per-episode JSON file name.
pub fn episode_file_name(episode_index: u64) -> String {
    format!("episode_{episode_index:06}_contact.json")
}

/// Paths written by [`write_annotations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Combined JSON document.
    pub combined: PathBuf,
    /// One JSON document per episode, in episode order.
    pub episodes: Vec<PathBuf>,
    /// Summary CSV.
    pub summary: PathBuf,
}

/// Render the combined document (array of per-episode bundles).
///
/// # Errors
///
/// Returns [`AnnotationError::JsonError`] if serialization fails.
pub fn render_combined(annotations: &AnnotationSet) -> Result<String, AnnotationError> {
    let bundles: Vec<EpisodeAnnotations<'_>> = annotations.episodes().collect();
    let mut text = serde_json::to_string_pretty(&bundles)?;
    text.push('\n');
    Ok(text)
}

/// Render one episode bundle.
///
/// # Errors
///
/// Returns [`AnnotationError::JsonError`] if serialization fails.
pub fn render_episode(bundle: &EpisodeAnnotations<'_>) -> Result<String, AnnotationError> {
    let mut text = serde_json::to_string_pretty(bundle)?;
    text.push('\n');
    Ok(text)
}

/// Render the flat summary table as CSV.
///
/// Booleans are written as `true`/`false`, unknown values as empty cells.
pub fn render_summary(annotations: &AnnotationSet) -> String {
    let mut csv = SUMMARY_COLUMNS.join(",");
    csv.push('\n');
    for frame in annotations.frames() {
        push_row(&mut csv, frame);
    }
    csv
}

fn push_row(csv: &mut String, frame: &AnnotatedFrame) {
    let cells = [
        frame.episode_index.to_string(),
        frame.frame_index.to_string(),
        flag_cell(frame.left_hand_contact),
        flag_cell(frame.right_hand_contact),
        escape_cell(frame.contact_object.as_deref().unwrap_or_default()),
        frame.confidence.to_string(),
        escape_cell(&frame.reason),
    ];
    let _ = writeln!(csv, "{}", cells.join(","));
}

fn flag_cell(flag: Option<bool>) -> String {
    flag.map(|value| value.to_string()).unwrap_or_default()
}

/// Quote a CSV cell when it contains a delimiter, quote, or line break.
fn escape_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Write all three views into `out_dir`, replacing earlier files.
///
/// # Errors
///
/// Returns I/O or JSON errors.
pub fn write_annotations<P: AsRef<Path>>(
    annotations: &AnnotationSet,
    out_dir: P,
) -> Result<OutputPaths, AnnotationError> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir)?;

    let mut episodes = Vec::with_capacity(annotations.episode_count());
    for bundle in annotations.episodes() {
        let path = out_dir.join(episode_file_name(bundle.episode_index));
        fs::write(&path, render_episode(&bundle)?)?;
        episodes.push(path);
    }

    let combined = out_dir.join(COMBINED_FILE_NAME);
    fs::write(&combined, render_combined(annotations)?)?;

    let summary = out_dir.join(SUMMARY_FILE_NAME);
    fs::write(&summary, render_summary(annotations))?;

    log::debug!(
        "Wrote {} episode file(s), combined and summary to {}",
        episodes.len(),
        out_dir.display()
    );
    Ok(OutputPaths {
        combined,
        episodes,
        summary,
    })
}
