//! Configuration provider trait for loading Skyla configuration from various sources.

use figment::Figment;

use crate::ConfigError;

/// Trait for loading Skyla configuration from different sources.
pub trait ConfigProvider {
    /// Loads the configuration and returns a Figment instance.
    fn load(&self) -> Result<Figment, ConfigError>;
}
