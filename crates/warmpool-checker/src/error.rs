//! Instance checker error types.

use thiserror::Error;

/// Errors that escape a `check_pools` pass and count against the error
/// budget. Per-instance create and per-orphan delete failures are
/// contained inside the pass and never reach this type.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("pool store error: {0}")]
    Store(#[from] warmpool_store::StoreError),

    #[error("compute adapter error: {0}")]
    Compute(#[from] warmpool_compute::ComputeError),
}

pub type CheckerResult<T> = Result<T, CheckerError>;
