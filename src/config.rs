//! Configuration management for evcal
//!
//! Handles loading and saving of the JSON configuration file holding the
//! tool's persistent defaults. Configuration is stored at
//! `~/.config/evcal/config.json`; command-line flags override it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "evcal";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Configuration
// ============================================================================

/// Persistent tool defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output format used when `--output-type` is not given
    #[serde(default)]
    pub output: OutputFormat,

    /// Device name or id used when `--device` is not given
    #[serde(default)]
    pub device: Option<String>,

    /// Always log at debug level
    #[serde(default)]
    pub verbose: bool,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if no config directory can be determined.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if the file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;
        config.config_path = Some(path.to_path_buf());

        tracing::debug!(
            path = %path.display(),
            output = ?config.output,
            device = ?config.device,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = match &self.config_path {
            Some(p) => p.clone(),
            None => Self::default_config_path().ok_or(ConfigError::NoConfigPath)?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::ParseError)?;
        fs::write(&path, contents).map_err(ConfigError::IoError)?;

        tracing::debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// No config path could be determined
    NoConfigPath,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::NoConfigPath => write!(f, "No config path could be determined"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::NoConfigPath => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.output, OutputFormat::Auto);
        assert_eq!(config.device, None);
        assert!(!config.verbose);
    }

    #[test]
    fn test_config_json_parsing() {
        let json = r#"{
            "output": "xorg-conf-d",
            "device": "FooTouch"
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.output, OutputFormat::XorgConfD);
        assert_eq!(config.device.as_deref(), Some("FooTouch"));
        // Defaults fill in missing fields
        assert!(!config.verbose);
    }

    #[test]
    fn test_config_json_minimal() {
        let json = r#"{}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.output, OutputFormat::Auto);
        assert_eq!(config.device, None);
    }

    #[test]
    fn test_output_format_names() {
        for (text, format) in [
            ("\"auto\"", OutputFormat::Auto),
            ("\"xorg-conf-d\"", OutputFormat::XorgConfD),
            ("\"hal\"", OutputFormat::Hal),
            ("\"xinput\"", OutputFormat::Xinput),
        ] {
            let parsed: OutputFormat = serde_json::from_str(text).unwrap();
            assert_eq!(parsed, format);
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.output, OutputFormat::Auto);
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            output: OutputFormat::Hal,
            device: Some("9".to_string()),
            verbose: true,
            config_path: Some(path.clone()),
        };
        config.save().unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.output, OutputFormat::Hal);
        assert_eq!(loaded.device.as_deref(), Some("9"));
        assert!(loaded.verbose);
    }
}
