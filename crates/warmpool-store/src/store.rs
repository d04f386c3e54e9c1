//! PoolStore — redb-backed queue and pool-config persistence.
//!
//! Provides FIFO queue operations over named queues plus the pool-config
//! hash. Queue values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe pool store backed by redb.
///
/// Each queue operation runs in its own transaction, so pop is atomic:
/// two concurrent pops against the same queue can never hand out the
/// same record.
#[derive(Clone)]
pub struct PoolStore {
    db: Arc<Database>,
}

impl PoolStore {
    /// Open (or create) a persistent pool store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "pool store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory pool store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory pool store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(QUEUES).map_err(map_err!(Table))?;
        txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Queues ─────────────────────────────────────────────────────

    /// Append a record to the tail of a queue.
    pub fn queue_push<T: Serialize>(&self, queue: &str, record: &T) -> StoreResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let next_seq = {
                let mut range = table
                    .range((queue, 0u64)..=(queue, u64::MAX))
                    .map_err(map_err!(Read))?;
                match range.next_back() {
                    Some(entry) => {
                        let (key, _) = entry.map_err(map_err!(Read))?;
                        key.value().1 + 1
                    }
                    None => 0,
                }
            };
            table
                .insert((queue, next_seq), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Pop the record at the head of a queue, or `None` when empty.
    pub fn queue_pop<T: DeserializeOwned>(&self, queue: &str) -> StoreResult<Option<T>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let popped = {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let head = {
                let mut range = table
                    .range((queue, 0u64)..=(queue, u64::MAX))
                    .map_err(map_err!(Read))?;
                match range.next() {
                    Some(entry) => {
                        let (key, value) = entry.map_err(map_err!(Read))?;
                        Some((key.value().1, value.value().to_vec()))
                    }
                    None => None,
                }
            };
            match head {
                Some((seq, bytes)) => {
                    table.remove((queue, seq)).map_err(map_err!(Write))?;
                    Some(bytes)
                }
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        match popped {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Read the record at the head of a queue without removing it.
    pub fn queue_peek<T: DeserializeOwned>(&self, queue: &str) -> StoreResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        let mut range = table
            .range((queue, 0u64)..=(queue, u64::MAX))
            .map_err(map_err!(Read))?;
        match range.next() {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Number of records currently in a queue.
    pub fn queue_len(&self, queue: &str) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        let range = table
            .range((queue, 0u64)..=(queue, u64::MAX))
            .map_err(map_err!(Read))?;
        let mut count = 0u64;
        for entry in range {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    /// Names of all non-empty queues.
    pub fn queue_names(&self) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        let mut names: Vec<String> = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let queue = key.value().0;
            if names.last().map(String::as_str) != Some(queue) {
                names.push(queue.to_string());
            }
        }
        Ok(names)
    }

    // ── Pool configs ───────────────────────────────────────────────

    /// Insert or update a pool's target size.
    pub fn set_pool_config(&self, pool_name: &str, target_size: u32) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
            table
                .insert(pool_name, target_size)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %pool_name, target_size, "pool config stored");
        Ok(())
    }

    /// Get a pool's target size, or `None` when unconfigured.
    pub fn get_pool_config(&self, pool_name: &str) -> StoreResult<Option<u32>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
        match table.get(pool_name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(guard.value())),
            None => Ok(None),
        }
    }

    /// Delete a pool config. Returns true if it existed.
    pub fn delete_pool_config(&self, pool_name: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
            existed = table.remove(pool_name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %pool_name, existed, "pool config deleted");
        Ok(existed)
    }

    /// All pool configs as a `name → target size` map.
    pub fn pool_configs(&self) -> StoreResult<BTreeMap<String, u32>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
        let mut configs = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            configs.insert(key.value().to_string(), value.value());
        }
        Ok(configs)
    }
}
