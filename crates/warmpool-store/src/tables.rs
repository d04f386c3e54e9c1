//! redb table definitions for the warmpool store.
//!
//! Queue entries use composite `(queue name, sequence)` keys so that a
//! range scan over one queue name walks records in FIFO order.

use redb::TableDefinition;

/// Instance-record queues keyed by `(queue name, sequence)`.
///
/// Pool queues are named after the pool (`image:machine-type[:public]`);
/// the orphan queue uses the fixed name `"orphaned"`.
pub const QUEUES: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("queues");

/// Pool configurations: pool name → target size.
pub const POOL_CONFIGS: TableDefinition<&str, u32> = TableDefinition::new("pool_configs");
