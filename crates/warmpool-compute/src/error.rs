//! Compute adapter error types.

use thiserror::Error;

/// Result type alias for compute adapter operations.
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Errors surfaced by a compute adapter.
///
/// Adapters map provider-specific failures into these variants; callers
/// decide whether an error is contained (per-instance create/delete) or
/// propagated (list calls feeding the error budget).
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The provider rejected or failed the call.
    #[error("provider error: {0}")]
    Provider(String),

    /// The referenced operation handle is unknown to the provider.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// The request was malformed before it reached the provider.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
