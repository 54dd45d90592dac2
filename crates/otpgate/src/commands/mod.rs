//! CLI command handlers.

pub mod code;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use otpgate_config::{ConfigError, LoadedConfig};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the explicit config file, or discover and merge the default layers.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = match &self.config_path {
            Some(path) => otpgate_config::load_config_from(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => otpgate_config::load_config(None)?,
        };

        for warning in &loaded.warnings {
            eprintln!("warning: {}", warning);
        }

        if self.verbose {
            let sources = loaded.loaded_from();
            if sources.is_empty() {
                eprintln!("No config files found, using defaults + CLI args");
            } else {
                for source in sources {
                    eprintln!("Loaded config: {}", source.display());
                }
            }
        }

        Ok(loaded)
    }
}

/// First non-blank value among the CLI/env value and the config value.
pub fn require(
    cli: Option<&str>,
    config: Option<&str>,
    field: &str,
    hint: &str,
) -> Result<String, ConfigError> {
    cli.into_iter()
        .chain(config)
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingField {
            field: field.to_string(),
            hint: hint.to_string(),
        })
}
