//! warmpool-compute — the cloud provider contract.
//!
//! Exposes the [`ComputeAdapter`] trait that the instance checker and the
//! matcher provision, inspect, label, and delete instances through. One
//! adapter implementation exists per cloud provider and is selected by
//! configuration at startup; this crate ships [`FakeCompute`], an
//! in-memory provider used by tests and by the daemon's `fake` provider
//! mode. Real providers (GCE and friends) implement the same trait out
//! of tree.
//!
//! Provisioning is asynchronous at the provider level: `begin_create`
//! returns an [`OperationHandle`] that callers poll until it reports
//! completion. Instance names are generated client-side before the
//! operation is issued, so a failed or timed-out create still has a known
//! identity to record as an orphan.

pub mod adapter;
pub mod error;
pub mod fake;

pub use adapter::{
    CloudInstance, ComputeAdapter, CreateInstance, InstanceAddresses, LabelFilter,
    OperationHandle, OperationStatus, WARMTH_COOLED, WARMTH_LABEL, WARMTH_WARMED,
};
pub use error::{ComputeError, ComputeResult};
pub use fake::FakeCompute;
