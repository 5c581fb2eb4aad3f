//! Error types for wintrack-core.

use std::path::PathBuf;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    ConfigRead(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// One or more config values are out of range.
    #[error("config validation failed:\n{}", .0.join("\n"))]
    ConfigValidation(Vec<String>),
}
