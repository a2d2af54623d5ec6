//! Detector definitions.
//!
//! A [`Detector`] is the smallest detection unit: a stable id, a pattern
//! (literal set or regex), classification metadata, and the scoring knobs
//! consumed by the context scorer.

use serde::{Deserialize, Serialize};

/// Classification of what a detector finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pii,
    Secret,
    Injection,
    Custom,
}

/// Baseline severity of a detector's matches.
///
/// Ordering is meaningful: `High > Medium > Low` is used for tie-breaking
/// between overlapping hits of equal confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

/// What to do with a confirmed hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Mask,
    Remove,
    Tokenize,
    Ignore,
}

/// The pattern payload of a detector.
///
/// Simple alternations are expressed as literal sets so the compiler can
/// feed them all into the multi-pattern automaton; everything else is a
/// single regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Literal { patterns: Vec<String> },
    Regex { pattern: String },
}

/// A single detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detector {
    /// Stable identifier, referenced by policy rules and hit reports.
    pub id: String,
    pub category: Category,
    pub kind: DetectorKind,
    pub risk: Risk,
    /// Action taken when no policy rule overrides it.
    pub default_action: Action,
    /// Keywords whose presence near a match raises confidence.
    #[serde(default)]
    pub context_hints: Vec<String>,
    /// Keywords whose presence near a match lowers confidence.
    #[serde(default)]
    pub negative_hints: Vec<String>,
    /// Hits scoring below this are dropped unless a policy rule overrides.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
    /// Masker to apply on `Action::Mask`; `None` uses the generic
    /// `[REDACTED:<ID>]` placeholder.
    #[serde(default)]
    pub masker_id: Option<String>,
    /// Glob-style name allowlist for pair-shaped detectors (for example
    /// cookie scanners): a match whose captured name fits one of these
    /// globs is suppressed.
    #[serde(default)]
    pub allow_names: Vec<String>,
}

fn default_min_confidence() -> u8 {
    50
}

impl Detector {
    /// Build a literal-set detector with defaults for the scoring knobs.
    pub fn literal<I, S>(id: &str, category: Category, risk: Risk, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            category,
            kind: DetectorKind::Literal {
                patterns: patterns.into_iter().map(Into::into).collect(),
            },
            risk,
            default_action: Action::Mask,
            context_hints: Vec::new(),
            negative_hints: Vec::new(),
            min_confidence: default_min_confidence(),
            masker_id: None,
            allow_names: Vec::new(),
        }
    }

    /// Build a regex detector with defaults for the scoring knobs.
    pub fn regex(id: &str, category: Category, risk: Risk, pattern: &str) -> Self {
        Self {
            id: id.to_string(),
            category,
            kind: DetectorKind::Regex {
                pattern: pattern.to_string(),
            },
            risk,
            default_action: Action::Mask,
            context_hints: Vec::new(),
            negative_hints: Vec::new(),
            min_confidence: default_min_confidence(),
            masker_id: None,
            allow_names: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.default_action = action;
        self
    }

    pub fn with_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_hints = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_negative_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.negative_hints = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_confidence(mut self, min: u8) -> Self {
        self.min_confidence = min.min(100);
        self
    }

    pub fn with_masker(mut self, masker_id: &str) -> Self {
        self.masker_id = Some(masker_id.to_string());
        self
    }

    pub fn with_allow_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_names = names.into_iter().map(Into::into).collect();
        self
    }
}
