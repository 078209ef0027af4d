//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATECHART_CONFIG or --config)
//! 3. Environment variables

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Interpreter settings shared by every instance of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on microsteps in one macrostep.
    pub max_microsteps: usize,
    /// Check configuration legality after every macrostep.
    pub validate_configuration: bool,
    /// Exit and clear all states when a top-level final state is reached.
    pub clear_on_termination: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_microsteps: 1000,
            validate_configuration: true,
            clear_on_termination: true,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `path`, or from the file named by
    /// `STATECHART_CONFIG` when no path is given, then applies environment
    /// variable overrides. Without either, starts from the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("STATECHART_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(max) = var("STATECHART_MAX_MICROSTEPS") {
            if let Ok(n) = max.parse() {
                self.max_microsteps = n;
            }
        }

        if let Some(validate) = var("STATECHART_VALIDATE") {
            self.validate_configuration = parse_flag(&validate);
        }

        if let Some(clear) = var("STATECHART_CLEAR_ON_TERMINATION") {
            self.clear_on_termination = parse_flag(&clear);
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
