//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use url::Url;
use validator::ValidationError;

/// Validate that a source URL parses and uses a supported scheme.
pub fn validate_source_url(url: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(url).map_err(|_| ValidationError::new("invalid_url"))?;
    match parsed.scheme() {
        "http" | "https" | "file" => Ok(()),
        _ => Err(ValidationError::new("unsupported_url_scheme")),
    }
}

/// Validate log level names accepted by the EnvFilter default.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"]
        .contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

/// Validate deployment environment names.
pub fn validate_environment(environment: &str) -> Result<(), ValidationError> {
    let valid = ["production", "development"].contains(&environment.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_environment"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_schemes() {
        assert!(validate_source_url("https://example.com/policy.json").is_ok());
        assert!(validate_source_url("file:///var/lib/skyla/policy.json").is_ok());
        assert!(validate_source_url("ftp://example.com/x").is_err());
        assert!(validate_source_url("not a url").is_err());
    }

    #[test]
    fn log_levels() {
        assert!(validate_log_level("info").is_ok());
        assert!(validate_log_level("WARN").is_ok());
        assert!(validate_log_level("loud").is_err());
    }

    #[test]
    fn environments() {
        assert!(validate_environment("production").is_ok());
        assert!(validate_environment("development").is_ok());
        assert!(validate_environment("staging").is_err());
    }
}
