//! Detection pipeline configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Parameters shaping scoring and normalization.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct EngineConfig {
    /// Deployment environment; development lowers default confidence
    /// thresholds by 10 points.
    #[validate(custom(function = validation::validate_environment))]
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Radius in bytes around a hit searched for context hints.
    #[serde(default = "default_hint_radius")]
    #[validate(range(min = 1, max = 1024))]
    pub hint_radius: usize,

    /// Collapse whitespace runs during normalization. Changes byte counts
    /// for downstream offsets, hence off by default.
    #[serde(default)]
    pub collapse_whitespace: bool,
}

fn default_environment() -> String {
    "production".into()
}

fn default_hint_radius() -> usize {
    40
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            hint_radius: default_hint_radius(),
            collapse_whitespace: false,
        }
    }
}
