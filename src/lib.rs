//! # handcontact
//!
//! Offline data preparation for hand–object contact annotation of robot
//! manipulation videos.
//!
//! `handcontact` samples frames from episode videos, composites short
//! temporal strips around every sampled frame, encodes one labeling request
//! per strip for an asynchronous Batch API, and reconciles the unordered
//! results back into per-episode, per-frame contact labels. Video decoding
//! is powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Sample a Dataset
//!
//! ```no_run
//! use std::path::Path;
//!
//! use handcontact::{DatasetLayout, PipelineOptions, SampleOptions, sample_dataset};
//!
//! let layout = DatasetLayout::new("data/g1_pick_place");
//! let report = sample_dataset(
//!     &layout,
//!     Path::new("frames"),
//!     &SampleOptions::new(10),
//!     &PipelineOptions::new(),
//! )?;
//! println!("{} frame(s) sampled", report.manifest.frame_count());
//! # Ok::<(), handcontact::AnnotationError>(())
//! ```
//!
//! ### Build the Batch Input
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufWriter;
//!
//! use handcontact::{EpisodeManifest, PipelineOptions, RequestOptions, StripOptions};
//!
//! let manifest = EpisodeManifest::load("frames/episodes_meta.json")?;
//! let options = RequestOptions::new("gpt-5-mini").with_strip(StripOptions::new(3));
//! let mut writer = BufWriter::new(File::create("batch/batch_input.jsonl")?);
//! let report = handcontact::write_batch(&manifest, &options, &PipelineOptions::new(), &mut writer)?;
//! println!("{} unit(s), {} skipped", report.written, report.skipped.len());
//! # Ok::<(), handcontact::AnnotationError>(())
//! ```
//!
//! ### Reconcile Results
//!
//! ```no_run
//! use handcontact::{Reconciler, write_annotations};
//!
//! let output = std::fs::read_to_string("batch/batch_output.jsonl")?;
//! let mut reconciler = Reconciler::new();
//! reconciler.push_jsonl(&output);
//! let result = reconciler.finish();
//! write_annotations(&result.annotations, "annotations")?;
//! # Ok::<(), handcontact::AnnotationError>(())
//! ```
//!
//! ## Features
//!
//! - **Frame sampling**: every Nth decoded frame, tagged with its original
//!   index, saved as JPEG
//! - **Strips**: clamped neighborhoods composited left to right with optional
//!   downscaling and height normalization
//! - **Batch requests**: strict JSON-schema responses, inline base64 images,
//!   stable `ep{episode:06}_fr{frame:06}` identifiers
//! - **Reconciliation**: order-independent, placeholder labels for unusable
//!   answers, explicit last-write-wins on duplicates
//! - **Batch API client**: upload, create, poll until terminal, download
//! - **Progress & cancellation**: cooperative callbacks and
//!   `CancellationToken` for long-running stages
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `rayon` | Encodes episodes in parallel across rayon threads |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system for the
//! sampler.

pub mod batch;
pub mod configuration;
pub mod custom_id;
pub mod dataset;
pub mod episode;
pub mod error;
pub mod inspect;
pub mod label;
pub mod output;
pub mod progress;
pub mod prompt;
#[cfg(feature = "rayon")]
mod rayon;
pub mod reconcile;
pub mod request;
pub mod sampler;
pub mod strip;

pub use batch::{
    BatchClient, BatchJob, BatchResults, BatchService, BatchStatus, WatchOptions, fetch_results,
    watch,
};
pub use configuration::{PipelineOptions, RequestOptions, SampleOptions, StripOptions};
pub use custom_id::WorkUnitId;
pub use dataset::DatasetLayout;
pub use episode::{EpisodeFrames, EpisodeManifest, FrameRecord};
pub use error::AnnotationError;
pub use inspect::{RequestSummary, read_work_units};
pub use label::{AnnotatedFrame, Confidence, ContactLabel, LabelSource};
pub use output::{OutputPaths, write_annotations};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use reconcile::{AnnotationSet, ReconcileReport, Reconciler, Reconciliation, reconcile};
pub use request::{BuildReport, ImageDetail, SkippedUnit, WorkUnit, write_batch};
pub use sampler::{SampleReport, sample_dataset, sample_episode, sample_video};
pub use strip::{EncodedStrip, build_strip, composite_strip, render_strip};
