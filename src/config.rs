//! Engine configuration
//!
//! Optional TOML-backed settings for embedding applications and the CLI:
//!
//! ```toml
//! template_dirs = ["templates", "shared/templates"]
//! auto_reload = true
//! cache = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading or parsing an engine config
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine settings consumed by [`Environment::from_config`](crate::Environment::from_config).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Template search directories, in priority order
    pub template_dirs: Vec<PathBuf>,
    /// Ask the loader for modification before serving cached templates
    pub auto_reload: bool,
    /// Cache compiled templates by name
    pub cache: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_dirs: vec![PathBuf::from("templates")],
            auto_reload: true,
            cache: true,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.template_dirs, vec![PathBuf::from("templates")]);
        assert!(config.auto_reload);
        assert!(config.cache);
    }

    #[test]
    fn test_from_toml_str() {
        let config = EngineConfig::from_toml_str(
            r#"
            template_dirs = ["a", "b"]
            auto_reload = false
            "#,
        )
        .unwrap();
        assert_eq!(
            config.template_dirs,
            vec![PathBuf::from("a"), PathBuf::from("b")]
        );
        assert!(!config.auto_reload);
        assert!(config.cache); // defaulted
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("template_dirs = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
