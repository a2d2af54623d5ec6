//! External policy document model.
//!
//! The policy is the single document that maps detector ids to actions and
//! thresholds. It arrives as JSON (camelCase field names on the wire) from
//! the reloader or from local configuration, and is consumed read-only by
//! the compiled engine.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::detector::Action;

/// Errors produced while parsing an external policy document.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hmacKey is not valid base64: {0}")]
    Key(#[from] base64::DecodeError),
}

/// Deployment environment; development lowers default thresholds so rule
/// authors see marginal hits during tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

/// Caller-supplied provenance of the scanned text.
///
/// System-originated text is unlikely to carry hostile instructions, so
/// injection-class confidence drops; untrusted text raises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    System,
    #[default]
    User,
    Untrusted,
}

/// Per-detector override inside a policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masker_id: Option<String>,
}

/// The keyed secret used for tokenization.
///
/// Wrapped so the raw bytes never appear in `Debug` output or logs; the
/// wire form is base64.
#[derive(Clone, PartialEq, Eq)]
pub struct HmacKey(Vec<u8>);

impl HmacKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacKey(..)")
    }
}

impl Serialize for HmacKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HmacKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(HmacKey)
            .map_err(serde::de::Error::custom)
    }
}

/// The global redaction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default = "default_action")]
    pub default_action: Action,
    #[serde(default)]
    pub rules: BTreeMap<String, PolicyRule>,
    /// Hints merged into every detector's context hints.
    #[serde(default)]
    pub context_hints: Vec<String>,
    /// Required iff any rule resolves to [`Action::Tokenize`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_key: Option<HmacKey>,
    #[serde(default)]
    pub environment: Environment,
    /// Collapse whitespace runs during normalization. Off by default since
    /// it changes byte counts for every downstream offset.
    #[serde(default)]
    pub collapse_whitespace: bool,
}

fn default_action() -> Action {
    Action::Mask
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            default_action: Action::Mask,
            rules: BTreeMap::new(),
            context_hints: Vec::new(),
            hmac_key: None,
            environment: Environment::Production,
            collapse_whitespace: false,
        }
    }
}

impl Policy {
    /// Parse a policy document from its JSON wire form.
    pub fn from_json(raw: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The action a hit of `detector_id` resolves to under this policy.
    pub fn action_for(&self, detector_id: &str, detector_default: Action) -> Action {
        self.rules
            .get(detector_id)
            .and_then(|r| r.action)
            .unwrap_or(detector_default)
    }

    /// The confidence threshold for `detector_id`, environment-adjusted.
    pub fn threshold_for(&self, detector_id: &str, detector_default: u8) -> u8 {
        let base = self
            .rules
            .get(detector_id)
            .and_then(|r| r.min_confidence)
            .unwrap_or(detector_default);
        match self.environment {
            Environment::Production => base,
            Environment::Development => base.saturating_sub(10),
        }
    }

    /// True when any rule (or the default) tokenizes.
    pub fn requires_key(&self) -> bool {
        self.default_action == Action::Tokenize
            || self
                .rules
                .values()
                .any(|r| r.action == Some(Action::Tokenize))
    }
}
