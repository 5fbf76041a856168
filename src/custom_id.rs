//! Work unit identifiers.
//!
//! Every request carries a `custom_id` of the form `ep{episode:06}_fr{frame:06}`
//! (for example `ep000003_fr000142`). The batch service echoes it back on the
//! matching completion record, which is the only link between a result and
//! the (episode, frame) pair it labels. [`WorkUnitId`] is the explicit codec
//! for that string: encoding validates the range, decoding accepts only the
//! exact fixed-width shape, so the mapping is a bijection.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::error::AnnotationError;

/// Largest episode or frame index that fits the six-digit fields.
pub const MAX_INDEX: u64 = 999_999;

const EPISODE_PREFIX: &str = "ep";
const FRAME_SEPARATOR: &str = "_fr";
const DIGITS: usize = 6;
const ENCODED_LEN: usize = EPISODE_PREFIX.len() + DIGITS + FRAME_SEPARATOR.len() + DIGITS;

/// The (episode, center frame) pair a work unit labels.
///
/// # Example
///
/// ```
/// use handcontact::WorkUnitId;
///
/// let id = WorkUnitId::new(3, 142)?;
/// assert_eq!(id.to_string(), "ep000003_fr000142");
/// assert_eq!("ep000003_fr000142".parse::<WorkUnitId>()?, id);
/// # Ok::<(), handcontact::AnnotationError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkUnitId {
    episode_index: u64,
    frame_index: u64,
}

impl WorkUnitId {
    /// Build an identifier, rejecting indices above [`MAX_INDEX`].
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::IdentifierOutOfRange`] naming the field
    /// that overflowed.
    pub fn new(episode_index: u64, frame_index: u64) -> Result<Self, AnnotationError> {
        if episode_index > MAX_INDEX {
            return Err(AnnotationError::IdentifierOutOfRange {
                field: "episode",
                value: episode_index,
            });
        }
        if frame_index > MAX_INDEX {
            return Err(AnnotationError::IdentifierOutOfRange {
                field: "frame",
                value: frame_index,
            });
        }
        Ok(Self {
            episode_index,
            frame_index,
        })
    }

    /// Episode index.
    pub fn episode_index(&self) -> u64 {
        self.episode_index
    }

    /// Original (unsampled) index of the strip's center frame.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl Display for WorkUnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{EPISODE_PREFIX}{:0width$}{FRAME_SEPARATOR}{:0width$}",
            self.episode_index,
            self.frame_index,
            width = DIGITS
        )
    }
}

impl FromStr for WorkUnitId {
    type Err = AnnotationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || AnnotationError::InvalidIdentifier(value.to_string());

        if value.len() != ENCODED_LEN {
            return Err(invalid());
        }
        let rest = value.strip_prefix(EPISODE_PREFIX).ok_or_else(invalid)?;
        let (episode, rest) = rest.split_at_checked(DIGITS).ok_or_else(invalid)?;
        let frame = rest.strip_prefix(FRAME_SEPARATOR).ok_or_else(invalid)?;

        let episode_index = parse_digits(episode).ok_or_else(invalid)?;
        let frame_index = parse_digits(frame).ok_or_else(invalid)?;
        Self::new(episode_index, frame_index)
    }
}

fn parse_digits(field: &str) -> Option<u64> {
    if field.len() != DIGITS || !field.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

impl Serialize for WorkUnitId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WorkUnitId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
