//! warmpool-store — embedded pool store for warmpool.
//!
//! Backed by [redb](https://docs.rs/redb), holds the per-pool FIFO queues
//! of warmed instance records, the dedicated orphan queue, and the pool
//! configuration hash (pool name → target size).
//!
//! # Architecture
//!
//! Queue entries are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by `(queue name, sequence)` so a range scan over one queue name
//! yields records in push order. Pop removes the lowest sequence inside a
//! single write transaction, which makes it the atomic hand-off primitive:
//! a record lives in exactly one queue at a time, and presence in a queue
//! is itself the availability signal.
//!
//! The `PoolStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. `PoolRegistry` layers a TTL cache
//! over the pool-config hash.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use registry::PoolRegistry;
pub use store::PoolStore;
pub use types::*;
