//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ManagerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse configuration from TOML text without validating it.
pub fn parse_config(content: &str) -> Result<ManagerConfig, ConfigError> {
    toml::from_str(content).map_err(ConfigError::Parse)
}

/// Load a configuration file, or the defaults when no path is given.
///
/// The result is not validated: callers apply command line overrides first
/// and then call [`validate_config`].
pub fn load_config(path: Option<&Path>) -> Result<ManagerConfig, ConfigError> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            parse_config(&content)
        }
        None => Ok(ManagerConfig::default()),
    }
}

/// Validate a configuration, wrapping failures as [`ConfigError`].
pub fn check_config(config: &ManagerConfig) -> Result<(), ConfigError> {
    validate_config(config).map_err(ConfigError::Validation)
}
