//! Scheduler error types.

use thiserror::Error;

use pulse_core::ConfigError;

/// Errors returned synchronously by scheduler operations.
///
/// Each one is raised before any state changes.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("worker already registered: {0}")]
    DuplicateWorker(String),

    #[error("worker id must not be empty")]
    EmptyWorkerId,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
