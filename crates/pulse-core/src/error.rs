//! Configuration and validation errors.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised synchronously when a caller supplies invalid input.
///
/// None of these leave scheduler state modified: validation always runs
/// before anything is applied.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid priority level: {0:?} (expected low, medium, high or critical)")]
    InvalidPriority(String),

    #[error("{field} out of range: {value} ({reason})")]
    OutOfRange {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

impl ConfigError {
    pub(crate) fn out_of_range(
        field: &'static str,
        value: impl ToString,
        reason: &'static str,
    ) -> Self {
        ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            reason,
        }
    }
}
