//! Error types for coprocessor backends

use thiserror::Error;

/// Result type alias for coprocessor setup and persistence
pub type Result<T> = std::result::Result<T, CoprError>;

/// Errors raised while building, loading, or saving a coprocessor
#[derive(Debug, Error)]
pub enum CoprError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] purse_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be written
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Exported image is malformed
    #[error("Invalid coprocessor image: {0}")]
    InvalidImage(String),
}
