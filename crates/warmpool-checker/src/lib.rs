//! warmpool-checker — the pool reconciliation engine.
//!
//! The [`InstanceChecker`] is the sole top-level control loop of the
//! warmpool process. Each iteration it:
//!
//! - Sweeps the orphan queue (best-effort deletes, bounded per cycle)
//! - Compares warmed instances in the provider against tracked queue
//!   records and skips the sizing pass when the gap exceeds the orphan
//!   threshold (circuit breaker against runaway creation)
//! - Tops up every configured pool to its target size
//!
//! Failures inside the loop never surface to clients; they feed an
//! [`ErrorBudget`] that distinguishes occasional blips from systemic
//! outage and stops the loop once a burst of consecutive failures lands
//! inside one error window. Process restart is the intended remediation.

pub mod budget;
pub mod checker;
pub mod error;

pub use budget::ErrorBudget;
pub use checker::{CheckerConfig, InstanceChecker};
pub use error::{CheckerError, CheckerResult};
