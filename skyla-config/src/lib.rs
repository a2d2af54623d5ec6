//! # Skyla Configuration System
//!
//! Hierarchical configuration management for the Skyla inspection engine.
//!
//! ## Features
//! - **Unified Configuration**: Single source of truth across all components
//! - **Validation**: Runtime validation of critical parameters
//! - **Environment Awareness**: Production/development profile overlays
//! - **Layered Sources**: Defaults, YAML files, and `SKYLA_*` environment
//!   variables, later layers winning

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod engine;
mod error;
mod provider;
mod reload;
mod telemetry;
mod validation;

pub use engine::EngineConfig;
pub use error::ConfigError;
pub use provider::ConfigProvider;
pub use reload::ReloadConfig;
pub use telemetry::TelemetryConfig;

/// Top-level configuration container for all Skyla components.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Default)]
pub struct SkylaConfig {
    /// Detection pipeline parameters (scoring radius, normalization).
    #[validate(nested)]
    pub engine: EngineConfig,

    /// Policy/dictionary reloader parameters.
    #[validate(nested)]
    pub reload: ReloadConfig,

    /// Logging and metrics configuration.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl SkylaConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/skyla.yaml` - base settings. If missing, defaults are used.
    /// 3. `config/<environment>.yaml` - environment-specific overrides.
    /// 4. `SKYLA_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(SkylaConfig::default()));

        let figment = if Path::new("config/skyla.yaml").exists() {
            figment.merge(Yaml::file("config/skyla.yaml"))
        } else {
            figment
        };

        let env = std::env::var("SKYLA_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        let figment = if Path::new(&env_file).exists() {
            figment.merge(Yaml::file(env_file))
        } else {
            figment
        };

        Self::extract(figment.merge(Env::prefixed("SKYLA_").split("__")))
    }

    /// Load configuration from a specific path for testing/validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(
                path.to_string_lossy().to_string(),
            )));
        }

        Self::extract(
            Figment::from(Serialized::defaults(SkylaConfig::default()))
                .merge(Yaml::file(path)),
        )
    }

    /// Load configuration through a custom provider.
    pub fn load_from(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        Self::extract(provider.load()?)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SkylaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reload.interval_ms, 30_000);
        assert_eq!(config.engine.hint_radius, 40);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "reload:\n  interval_ms: 60000\nengine:\n  hint_radius: 80\n"
        )
        .unwrap();
        let config = SkylaConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.reload.interval_ms, 60_000);
        assert_eq!(config.engine.hint_radius, 80);
        // Untouched sections keep their defaults.
        assert_eq!(config.reload.max_interval_ms, 300_000);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "reload:\n  interval_ms: 10\n").unwrap();
        assert!(matches!(
            SkylaConfig::load_from_path(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            SkylaConfig::load_from_path("does/not/exist.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn file_sources_require_a_base_dir() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "reload:\n  policy_url: \"file:///etc/skyla/policy.json\"\n"
        )
        .unwrap();
        assert!(matches!(
            SkylaConfig::load_from_path(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }
}
