//! Parallel work-unit encoding.
//!
//! Episodes are independent, so strip rendering is spread across rayon
//! threads one episode per task. Each worker reads only its own episode's
//! frame files. The public entry point stays
//! [`write_batch`](crate::write_batch); this module holds the fan-out.

use std::sync::Mutex;

use ::rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::configuration::{PipelineOptions, RequestOptions};
use crate::episode::EpisodeManifest;
use crate::error::AnnotationError;
use crate::progress::ProgressTracker;
use crate::request::{SkippedUnit, WorkUnit, encode_episode};

/// Encode every episode of `manifest` in parallel.
///
/// Results come back in manifest order, so writing them sequentially gives
/// exactly the serial output. Workers advance `tracker` as each center
/// frame finishes. The first error (including cancellation) aborts the
/// whole build.
pub(crate) fn build_episodes_parallel(
    manifest: &EpisodeManifest,
    options: &RequestOptions,
    pipeline: &PipelineOptions,
    tracker: &Mutex<ProgressTracker>,
) -> Result<Vec<(Vec<WorkUnit>, Vec<SkippedUnit>)>, AnnotationError> {
    manifest
        .episodes
        .par_iter()
        .map(|episode| {
            if pipeline.is_cancelled() {
                return Err(AnnotationError::Cancelled);
            }
            encode_episode(episode, options, pipeline, Some(tracker))
        })
        .collect()
}
