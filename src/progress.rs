//! Stage progress and cooperative cancellation.
//!
//! Long stages (sampling an episode video, rendering a batch, reconciling
//! results) report through a [`ProgressCallback`] and stop early when a
//! shared [`CancellationToken`] fires. Both are attached to a stage through
//! [`PipelineOptions`](crate::PipelineOptions).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use handcontact::{
//!     AnnotationError, EpisodeManifest, PipelineOptions, ProgressCallback, ProgressInfo,
//!     RequestOptions,
//! };
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("[{:?}] {pct:.1}% complete", info.operation);
//!         }
//!     }
//! }
//!
//! let manifest = EpisodeManifest::load("frames/episodes_meta.json")?;
//! let pipeline = PipelineOptions::new().with_progress(Arc::new(PrintProgress));
//! let mut out = Vec::new();
//! handcontact::write_batch(&manifest, &RequestOptions::default(), &pipeline, &mut out)?;
//! # Ok::<(), AnnotationError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// Which stage a progress report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Decoding an episode video and saving sampled frames.
    FrameSampling,
    /// Compositing strips and encoding work units.
    RequestBuilding,
    /// Matching completion records back to episodes and frames.
    Reconciliation,
}

/// Point-in-time view of a running stage.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Stage being reported.
    pub operation: OperationType,
    /// Items (sampled frames, work units, records) done so far.
    pub current: u64,
    /// Items expected in total, when known up front.
    pub total: Option<u64>,
    /// `current / total` as a percentage.
    pub percentage: Option<f32>,
    /// Time since the stage started.
    pub elapsed: Duration,
    /// Linear extrapolation of the remaining time.
    pub estimated_remaining: Option<Duration>,
    /// Episode being worked on, if the stage knows it.
    pub current_episode: Option<u64>,
    /// Original frame index being worked on, if the stage knows it.
    pub current_frame: Option<u64>,
}

/// Receives [`ProgressInfo`] snapshots.
///
/// Must be [`Send`] + [`Sync`]: with the `rayon` feature, reports can come
/// from worker threads. A callback only observes; to stop a stage, cancel
/// its [`CancellationToken`].
pub trait ProgressCallback: Send + Sync {
    /// Handle one snapshot.
    fn on_progress(&self, info: &ProgressInfo);
}

pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Shared cancellation flag.
///
/// Clones share one flag, so any clone can cancel and every stage holding
/// another clone sees it before its next item.
///
/// # Example
///
/// ```
/// use handcontact::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// assert!(!token.is_cancelled());
///
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Counts items for one stage and throttles callbacks to every
/// `batch_size` items.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    done: u64,
    pending: u64,
    batch_size: u64,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            done: 0,
            pending: 0,
            batch_size: batch_size.max(1),
            started: Instant::now(),
        }
    }

    /// One item finished.
    pub(crate) fn advance(&mut self, episode: Option<u64>, frame: Option<u64>) {
        self.done += 1;
        self.pending += 1;
        if self.pending >= self.batch_size {
            self.pending = 0;
            self.emit(episode, frame);
        }
    }

    /// Always emit a closing snapshot.
    pub(crate) fn finish(&mut self) {
        self.emit(None, None);
    }

    fn emit(&self, episode: Option<u64>, frame: Option<u64>) {
        let elapsed = self.started.elapsed();
        let known_total = self.total.filter(|&total| total > 0);

        let percentage = known_total.map(|total| self.done as f32 / total as f32 * 100.0);
        let estimated_remaining = match (self.total, self.done) {
            (Some(total), done) if done > 0 => {
                let left = total.saturating_sub(done) as f64;
                Some(elapsed.mul_f64(left / done as f64))
            }
            _ => None,
        };

        self.callback.on_progress(&ProgressInfo {
            operation: self.operation,
            current: self.done,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            current_episode: episode,
            current_frame: frame,
        });
    }
}
