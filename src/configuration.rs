//! Pipeline configuration.
//!
//! [`PipelineOptions`] threads progress callbacks, cancellation tokens, and
//! reporting cadence through every long-running stage without polluting
//! each function signature. The stage-specific builders
//! ([`SampleOptions`], [`StripOptions`], [`RequestOptions`]) carry the
//! tunables of the sampler, strip builder, and request encoder.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use handcontact::{
//!     CancellationToken, PipelineOptions, ProgressCallback, ProgressInfo, RequestOptions,
//!     StripOptions,
//! };
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?}: {} done", info.operation, info.current);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let pipeline = PipelineOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_cancellation(token.clone())
//!     .with_batch_size(10);
//!
//! let request = RequestOptions::new("gpt-4o")
//!     .with_strip(StripOptions::new(5).with_scale(0.5));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::error::AnnotationError;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};
use crate::request::ImageDetail;

/// Default JPEG quality for sampled frames and composited strips.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Default model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Default robot description inserted into the system prompt.
pub const DEFAULT_ROBOT_DESCRIPTION: &str =
    "The robot is a Unitree G1 humanoid robot with dexterous Inspire hands.";

/// Operational settings shared by all pipeline stages.
///
/// All fields have sensible defaults: a default-constructed value reports
/// nothing and is never cancelled.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Progress callback. Defaults to a no-op.
    pub(crate) progress: Arc<dyn ProgressCallback>,
    /// Cancellation token. `None` means never cancelled.
    pub(crate) cancellation: Option<CancellationToken>,
    /// How often to fire the progress callback (every N items).
    pub(crate) batch_size: u64,
}

impl Debug for PipelineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineOptions")
            .field("has_progress", &true)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptions {
    /// Create options with no progress callback, no cancellation, batch size 1.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
        }
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, the running stage stops at the next
    /// item boundary and returns [`AnnotationError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

/// Frame sampling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct SampleOptions {
    /// Keep every `step`-th decoded frame (decode index `% step == 0`).
    pub step: u64,
    /// JPEG quality for saved frames (1–100).
    pub jpeg_quality: u8,
    /// Re-encode frames whose file already exists.
    pub overwrite: bool,
    /// Only process the first N episodes of the dataset.
    pub max_episodes: Option<usize>,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            step: 10,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            overwrite: false,
            max_episodes: None,
        }
    }
}

impl SampleOptions {
    /// Sample every `step`-th frame with default quality.
    pub fn new(step: u64) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// Set the JPEG quality, clamped to `1..=100`.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Control whether existing frame files are rewritten.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Limit the number of episodes processed.
    pub fn with_max_episodes(mut self, max_episodes: Option<usize>) -> Self {
        self.max_episodes = max_episodes;
        self
    }

    /// Check that the step is usable.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::InvalidInterval`] for a zero step.
    pub fn validate(&self) -> Result<(), AnnotationError> {
        if self.step == 0 {
            return Err(AnnotationError::InvalidInterval);
        }
        Ok(())
    }
}

/// Strip layout and compositing settings.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct StripOptions {
    /// Number of frames per strip. Odd sizes are recommended.
    pub strip_size: usize,
    /// Uniform downscale applied to every frame before compositing.
    /// `None` keeps the source size.
    pub scale: Option<f32>,
    /// JPEG quality of the composited strip (1–100).
    pub jpeg_quality: u8,
}

impl Default for StripOptions {
    fn default() -> Self {
        Self {
            strip_size: 3,
            scale: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl StripOptions {
    /// Create strip options with the given size.
    pub fn new(strip_size: usize) -> Self {
        Self {
            strip_size,
            ..Self::default()
        }
    }

    /// Downscale every frame by `scale` (aspect preserving).
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set the strip JPEG quality, clamped to `1..=100`.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Check size and scale.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::InvalidStripSize`] for a zero size and
    /// [`AnnotationError::InvalidScale`] for a scale outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), AnnotationError> {
        if self.strip_size == 0 {
            return Err(AnnotationError::InvalidStripSize(self.strip_size));
        }
        if let Some(scale) = self.scale {
            if !(scale > 0.0 && scale <= 1.0) {
                return Err(AnnotationError::InvalidScale(scale));
            }
        }
        Ok(())
    }
}

/// Request encoding settings.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct RequestOptions {
    /// Model identifier written into every work unit.
    pub model: String,
    /// Strip layout and compositing.
    pub strip: StripOptions,
    /// Image detail hint sent with the strip.
    pub detail: ImageDetail,
    /// Sentence describing the robot, appended to the system prompt.
    pub robot_description: String,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            strip: StripOptions::default(),
            detail: ImageDetail::High,
            robot_description: DEFAULT_ROBOT_DESCRIPTION.to_string(),
        }
    }
}

impl RequestOptions {
    /// Create request options for `model` with default strip settings.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Set the strip settings.
    pub fn with_strip(mut self, strip: StripOptions) -> Self {
        self.strip = strip;
        self
    }

    /// Set the image detail hint.
    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Replace the robot description used in the system prompt.
    pub fn with_robot_description(mut self, description: impl Into<String>) -> Self {
        self.robot_description = description.into();
        self
    }
}
