//! Policy/dictionary reloader configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate, ValidationError};

use crate::validation;

/// Reloader parameters. Reloading is disabled entirely when no
/// `policy_url` is configured.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validate_reload))]
pub struct ReloadConfig {
    /// Source of the policy document.
    #[validate(custom(function = validation::validate_source_url))]
    #[serde(default)]
    pub policy_url: Option<String>,

    /// Source of the dictionary manifest.
    #[validate(custom(function = validation::validate_source_url))]
    #[serde(default)]
    pub manifest_url: Option<String>,

    /// Base tick interval in milliseconds (jittered ±20 % at runtime).
    #[serde(default = "default_interval_ms")]
    #[validate(range(min = 1000, max = 3_600_000))]
    pub interval_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    #[validate(range(min = 1000, max = 86_400_000))]
    pub max_interval_ms: u64,

    /// Directory `file://` sources must resolve under. Required when any
    /// source uses the file scheme.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Hostnames permitted in `file://host/...` URLs.
    #[serde(default)]
    pub allow_hosts: Vec<String>,

    /// Size ceiling in bytes for file sources.
    #[serde(default = "default_max_bytes")]
    #[validate(range(min = 1, max = 104_857_600))]
    pub max_bytes: u64,
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_max_interval_ms() -> u64 {
    300_000
}

fn default_max_bytes() -> u64 {
    1 << 20
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            policy_url: None,
            manifest_url: None,
            interval_ms: default_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            base_dir: None,
            allow_hosts: Vec::new(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn validate_reload(config: &ReloadConfig) -> Result<(), ValidationError> {
    let uses_file_scheme = [&config.policy_url, &config.manifest_url]
        .into_iter()
        .flatten()
        .any(|url| url.starts_with("file://"));
    if uses_file_scheme && config.base_dir.is_none() {
        return Err(ValidationError::new("file_source_requires_base_dir"));
    }
    if config.max_interval_ms < config.interval_ms {
        return Err(ValidationError::new("max_interval_below_interval"));
    }
    Ok(())
}
