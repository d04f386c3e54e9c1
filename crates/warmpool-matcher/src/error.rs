//! Matcher error types.

use thiserror::Error;

/// Errors surfaced to the HTTP layer during instance allocation.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("pool store error: {0}")]
    Store(#[from] warmpool_store::StoreError),

    #[error("compute adapter error: {0}")]
    Compute(#[from] warmpool_compute::ComputeError),
}

pub type MatcherResult<T> = Result<T, MatcherError>;
