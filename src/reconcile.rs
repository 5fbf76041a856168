//! Batch result reconciliation.
//!
//! The batch service returns completion records in no particular order.
//! The [`Reconciler`] decodes each record's `custom_id` back to its
//! (episode, frame) pair, parses the answer against the strict label schema,
//! and files the label in an [`AnnotationSet`]. Problems stay local to the
//! record that caused them:
//!
//! - an undecodable `custom_id` skips the record and is counted;
//! - an error-shaped record, a refusal, missing content, or content that
//!   does not match the schema yields a placeholder label, so every
//!   decodable identifier still has exactly one entry;
//! - a repeated identifier replaces the earlier entry (last record in input
//!   order wins) and is counted as a duplicate.
//!
//! The set is an explicit value: start from [`AnnotationSet::new`] or feed
//! an existing one to [`Reconciler::resume`] and get it back from
//! [`Reconciler::finish`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::configuration::PipelineOptions;
use crate::custom_id::WorkUnitId;
use crate::error::AnnotationError;
use crate::label::{AnnotatedFrame, ContactLabel, LabelSource};
use crate::progress::{OperationType, ProgressTracker};

/// Labels grouped by episode, then by frame, both ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    episodes: BTreeMap<u64, BTreeMap<u64, AnnotatedFrame>>,
}

/// One episode's labels in frame order, borrowed from an [`AnnotationSet`].
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeAnnotations<'a> {
    /// Episode index.
    pub episode_index: u64,
    /// Labels sorted by `frame_index`.
    pub frames: Vec<&'a AnnotatedFrame>,
}

impl AnnotationSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// File a label at its coordinates, returning the entry it replaced.
    pub fn insert(&mut self, frame: AnnotatedFrame) -> Option<AnnotatedFrame> {
        self.episodes
            .entry(frame.episode_index)
            .or_default()
            .insert(frame.frame_index, frame)
    }

    /// Label at `(episode_index, frame_index)`.
    pub fn get(&self, episode_index: u64, frame_index: u64) -> Option<&AnnotatedFrame> {
        self.episodes.get(&episode_index)?.get(&frame_index)
    }

    /// Total number of labels.
    pub fn len(&self) -> usize {
        self.episodes.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if no label has been filed.
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Number of episodes with at least one label.
    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    /// Number of placeholder labels currently in the set.
    pub fn placeholder_count(&self) -> usize {
        self.frames().filter(|frame| frame.is_placeholder()).count()
    }

    /// Per-episode bundles in episode order.
    pub fn episodes(&self) -> impl Iterator<Item = EpisodeAnnotations<'_>> {
        self.episodes
            .iter()
            .map(|(&episode_index, frames)| EpisodeAnnotations {
                episode_index,
                frames: frames.values().collect(),
            })
    }

    /// All labels flattened in (episode, frame) order.
    pub fn frames(&self) -> impl Iterator<Item = &AnnotatedFrame> {
        self.episodes.values().flat_map(BTreeMap::values)
    }
}

/// Counters collected while reconciling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records seen (excluding malformed lines).
    pub records: usize,
    /// Records whose answer parsed against the schema.
    pub parsed: usize,
    /// Records that produced a placeholder label.
    pub placeholders: usize,
    /// `custom_id` values that could not be decoded (missing ids appear as
    /// an empty string).
    pub undecodable: Vec<String>,
    /// JSONL lines that were not valid JSON.
    pub malformed_lines: usize,
    /// Records that replaced an earlier record with the same identifier.
    pub duplicates: usize,
}

impl ReconcileReport {
    /// Records that did not yield a parsed label.
    pub fn failed(&self) -> usize {
        self.placeholders + self.undecodable.len() + self.malformed_lines
    }
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// The aggregated labels.
    pub annotations: AnnotationSet,
    /// What happened along the way.
    pub report: ReconcileReport,
}

/// Incremental reconciler over raw completion records.
///
/// # Example
///
/// ```
/// use handcontact::Reconciler;
/// use serde_json::json;
///
/// let mut reconciler = Reconciler::new();
/// reconciler.push(&json!({"custom_id": "ep000002_fr000050", "response": null}));
/// let result = reconciler.finish();
///
/// let label = result.annotations.get(2, 50).unwrap();
/// assert!(label.is_placeholder());
/// assert_eq!(result.report.placeholders, 1);
/// ```
#[derive(Debug, Default)]
pub struct Reconciler {
    annotations: AnnotationSet,
    report: ReconcileReport,
}

impl Reconciler {
    /// Start from an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue filing into an existing set.
    pub fn resume(annotations: AnnotationSet) -> Self {
        Self {
            annotations,
            report: ReconcileReport::default(),
        }
    }

    /// Reconcile one raw record.
    pub fn push(&mut self, record: &Value) {
        self.report.records += 1;

        let raw_id = record
            .get("custom_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let id = match raw_id.parse::<WorkUnitId>() {
            Ok(id) => id,
            Err(error) => {
                log::warn!("skipping record: {error}");
                self.report.undecodable.push(raw_id.to_string());
                return;
            }
        };

        let (label, source) = match extract_label(record) {
            Ok(label) => {
                self.report.parsed += 1;
                (label, LabelSource::Response)
            }
            Err(failure) => {
                log::warn!("{id}: {failure}");
                self.report.placeholders += 1;
                (ContactLabel::placeholder(failure), LabelSource::Placeholder)
            }
        };

        let frame = AnnotatedFrame::new(id.episode_index(), id.frame_index(), label, source);
        if self.annotations.insert(frame).is_some() {
            log::warn!("{id}: duplicate record replaces the earlier one");
            self.report.duplicates += 1;
        }
    }

    /// Reconcile every non-blank line of a JSONL document.
    ///
    /// Lines that are not valid JSON are counted in
    /// [`ReconcileReport::malformed_lines`] and skipped.
    pub fn push_jsonl(&mut self, text: &str) {
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(record) => self.push(&record),
                Err(error) => {
                    log::warn!("skipping malformed line {}: {error}", number + 1);
                    self.report.malformed_lines += 1;
                }
            }
        }
    }

    /// Counters so far.
    pub fn report(&self) -> &ReconcileReport {
        &self.report
    }

    /// Hand back the set and the report.
    pub fn finish(self) -> Reconciliation {
        Reconciliation {
            annotations: self.annotations,
            report: self.report,
        }
    }
}

/// Reconcile a collection of raw records from scratch.
pub fn reconcile<'a, I>(records: I) -> Reconciliation
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut reconciler = Reconciler::new();
    for record in records {
        reconciler.push(record);
    }
    reconciler.finish()
}

/// Reconcile records into `annotations` with progress and cancellation.
///
/// # Errors
///
/// Returns [`AnnotationError::Cancelled`] if the pipeline token fires.
pub fn reconcile_with_options(
    annotations: AnnotationSet,
    records: &[Value],
    pipeline: &PipelineOptions,
) -> Result<Reconciliation, AnnotationError> {
    let mut tracker = ProgressTracker::new(
        pipeline.progress.clone(),
        OperationType::Reconciliation,
        Some(records.len() as u64),
        pipeline.batch_size,
    );
    let mut reconciler = Reconciler::resume(annotations);
    for record in records {
        if pipeline.is_cancelled() {
            return Err(AnnotationError::Cancelled);
        }
        reconciler.push(record);
        tracker.advance(None, None);
    }
    tracker.finish();
    Ok(reconciler.finish())
}

/// Pull the label out of one completion record.
///
/// On failure returns a short `"<kind>: <detail>"` description suitable as
/// a placeholder reason.
pub fn extract_label(record: &Value) -> Result<ContactLabel, String> {
    if let Some(error) = record.get("error").filter(|error| !error.is_null()) {
        return Err(format!("request error: {}", describe_error(error)));
    }

    let response = record
        .get("response")
        .filter(|response| !response.is_null())
        .ok_or_else(|| "missing response".to_string())?;

    if let Some(status) = response.get("status_code").and_then(Value::as_u64) {
        if status != 200 {
            let detail = response
                .pointer("/body/error")
                .map(describe_error)
                .unwrap_or_else(|| "no detail".to_string());
            return Err(format!("upstream error (status {status}): {detail}"));
        }
    }

    let message = response
        .pointer("/body/choices/0/message")
        .ok_or_else(|| "missing content: no choices in response body".to_string())?;

    if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
        return Err(format!("refused: {refusal}"));
    }

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing content: message has no text".to_string())?;

    serde_json::from_str::<ContactLabel>(content).map_err(|error| format!("parse error: {error}"))
}

fn describe_error(error: &Value) -> String {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    match error.get("code").and_then(Value::as_str) {
        Some(code) => format!("{code}: {message}"),
        None => message,
    }
}
