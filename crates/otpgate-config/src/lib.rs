//! Configuration system for the otpgate proxy.
//!
//! Provides TOML-based configuration with:
//! - `[upstream]`, `[credentials]`, `[server]` and `[startup]` sections
//! - Config file layering (XDG user config + project-local overrides)
//! - Warnings for secrets stored in plaintext

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_from, load_config_file, load_config_with_options,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
