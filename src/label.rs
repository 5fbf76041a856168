//! Contact labels.
//!
//! A [`ContactLabel`] is the structured judgment for one (episode, frame)
//! pair. It is either parsed from the labeling model's answer, which must
//! match the strict schema declared in every request, or synthesized as a
//! low-confidence placeholder when the answer is unusable.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AnnotationError;

/// How sure the labeling model is about a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Clear view, unambiguous contact state.
    High,
    /// Partly occluded or borderline.
    Medium,
    /// Guess, or a placeholder.
    Low,
}

impl Confidence {
    /// Lowercase name as written in the outputs.
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl Display for Confidence {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Structured contact judgment for one frame.
///
/// Deserialization is strict: all five fields must be present (the
/// nullable ones may be `null`) and unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactLabel {
    /// Left hand touching an object; `None` when not visible.
    #[serde(deserialize_with = "required_nullable")]
    pub left_hand_contact: Option<bool>,
    /// Right hand touching an object; `None` when not visible.
    #[serde(deserialize_with = "required_nullable")]
    pub right_hand_contact: Option<bool>,
    /// Object being touched, if any.
    #[serde(deserialize_with = "required_nullable")]
    pub contact_object: Option<String>,
    /// Model confidence.
    pub confidence: Confidence,
    /// Short rationale.
    pub reason: String,
}

impl ContactLabel {
    /// Parse a model answer against the strict label schema.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::JsonError`] for malformed JSON, missing
    /// or extra fields, or wrongly typed values.
    pub fn parse(content: &str) -> Result<Self, AnnotationError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Placeholder used when no valid answer is available.
    ///
    /// Both hands are unknown, no object, low confidence, and the reason
    /// describes what went wrong.
    pub fn placeholder(reason: impl Into<String>) -> Self {
        Self {
            left_hand_contact: None,
            right_hand_contact: None,
            contact_object: None,
            confidence: Confidence::Low,
            reason: reason.into(),
        }
    }
}

/// Where a label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSource {
    /// Parsed from a conforming model answer.
    Response,
    /// Synthesized because the record could not be used.
    Placeholder,
}

/// A label placed at its (episode, frame) coordinates.
///
/// Serializes with the label fields first, then the coordinates, then the
/// source tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedFrame {
    /// Left hand touching an object; `None` when not visible.
    pub left_hand_contact: Option<bool>,
    /// Right hand touching an object; `None` when not visible.
    pub right_hand_contact: Option<bool>,
    /// Object being touched, if any.
    pub contact_object: Option<String>,
    /// Model confidence.
    pub confidence: Confidence,
    /// Short rationale (or failure description for placeholders).
    pub reason: String,
    /// Original frame index of the strip center.
    pub frame_index: u64,
    /// Episode index.
    pub episode_index: u64,
    /// Whether the label was parsed or synthesized.
    pub source: LabelSource,
}

impl AnnotatedFrame {
    /// Place `label` at `(episode_index, frame_index)`.
    pub fn new(
        episode_index: u64,
        frame_index: u64,
        label: ContactLabel,
        source: LabelSource,
    ) -> Self {
        Self {
            left_hand_contact: label.left_hand_contact,
            right_hand_contact: label.right_hand_contact,
            contact_object: label.contact_object,
            confidence: label.confidence,
            reason: label.reason,
            frame_index,
            episode_index,
            source,
        }
    }

    /// Returns `true` for synthesized placeholder labels.
    pub fn is_placeholder(&self) -> bool {
        self.source == LabelSource::Placeholder
    }
}

/// Deserialize an `Option` that must be present but may be `null`.
fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}
