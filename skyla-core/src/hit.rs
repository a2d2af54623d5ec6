//! Located, scored matches.

use serde::{Deserialize, Serialize};

use crate::detector::{Action, Category};

/// Breakdown of the score terms that produced a hit's confidence.
///
/// Kept on every hit so callers can audit why a match was kept or see how
/// close a suppressed candidate came to the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitFeatures {
    pub boundary: i16,
    pub context: i16,
    /// Distance in bytes from the match to the nearest context hint, when
    /// one was found inside the radius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_distance: Option<u32>,
    pub negative: i16,
    pub trust: i16,
    pub structural: i16,
}

/// A confirmed match, offsets relative to the original input bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub detector_id: String,
    pub category: Category,
    pub start: usize,
    pub end: usize,
    pub matched_text: String,
    /// Final clamped confidence in `[0, 100]`.
    pub confidence: u8,
    pub action: Action,
    pub features: HitFeatures,
}

impl Hit {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when `other` lies strictly inside this hit's span.
    pub fn contains(&self, other: &Hit) -> bool {
        self.start <= other.start && other.end <= self.end && self.len() > other.len()
    }
}
