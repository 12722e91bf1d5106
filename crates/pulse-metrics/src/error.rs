//! Sampling error types.

use thiserror::Error;

/// Result type alias for sampling operations.
pub type SampleResult<T> = Result<T, SampleError>;

/// Errors raised while reading host metrics.
///
/// All of these are transient from the sampler's point of view: the
/// periodic loop logs them and tries again on the next tick.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("host metrics unavailable: {0}")]
    Unavailable(String),
}
