//! Configuration system for the Fora native code compiler.
//!
//! Load compiler settings from TOML or YAML to control Cranelift
//! optimisation and verification without code changes.
//!
//! # Examples
//!
//! ```
//! use fora_config::{CompilerConfig, OptLevel};
//!
//! let config = CompilerConfig::from_toml_str(r#"
//!     opt_level = "speed_and_size"
//!     enable_verifier = false
//! "#).unwrap();
//!
//! assert_eq!(config.opt_level, OptLevel::SpeedAndSize);
//! assert!(!config.enable_verifier);
//! ```
//!
//! Use default config when file is missing:
//!
//! ```
//! use fora_config::CompilerConfig;
//!
//! let config = CompilerConfig::load("fora.toml").unwrap_or_default();
//! assert!(config.enable_verifier);
//! ```

#[cfg(test)]
mod tests;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Native code compiler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CompilerConfig {
    /// Cranelift optimisation level.
    #[serde(default)]
    pub opt_level: OptLevel,

    /// Run the Cranelift IR verifier on every compiled entry.
    #[serde(default = "default_true")]
    pub enable_verifier: bool,

    /// Keep frame pointers in generated code (useful for profilers).
    #[serde(default)]
    pub preserve_frame_pointers: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            enable_verifier: true,
            preserve_frame_pointers: false,
        }
    }
}

impl CompilerConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file doesn't exist or contains invalid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the optimisation level.
    pub fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    /// Enables or disables the IR verifier.
    pub fn with_verifier(mut self, enabled: bool) -> Self {
        self.enable_verifier = enabled;
        self
    }

    /// Enables or disables frame pointer preservation.
    pub fn with_frame_pointers(mut self, enabled: bool) -> Self {
        self.preserve_frame_pointers = enabled;
        self
    }

    /// Rejects contradictory settings: `speed_and_size` cannot keep frame pointers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preserve_frame_pointers && self.opt_level == OptLevel::SpeedAndSize {
            return Err(ConfigError::Invalid(
                "preserve_frame_pointers requires opt_level `none` or `speed`".into(),
            ));
        }
        Ok(())
    }
}

/// Cranelift optimisation level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimisation; fastest compilation.
    None,

    /// Optimise for run time.
    #[default]
    Speed,

    /// Optimise for run time and code size.
    SpeedAndSize,
}

impl OptLevel {
    /// Value of the Cranelift `opt_level` setting.
    pub fn as_cranelift_str(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}
