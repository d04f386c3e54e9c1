//! PoolRegistry — cached view of the pool-config hash.
//!
//! Reconciliation and request matching both consult the pool configs on
//! every pass, so the registry keeps a snapshot and only re-reads the
//! store once the snapshot is older than the TTL. Writes go straight
//! through to the store and drop the snapshot.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::StoreResult;
use crate::store::PoolStore;
use crate::types::PoolSpec;

struct Snapshot {
    fetched_at: Instant,
    pools: Vec<PoolSpec>,
}

/// Cached pool-config registry over a [`PoolStore`].
#[derive(Clone)]
pub struct PoolRegistry {
    store: PoolStore,
    ttl: Duration,
    cache: Arc<RwLock<Option<Snapshot>>>,
}

impl PoolRegistry {
    /// Create a registry with the given cache TTL.
    pub fn new(store: PoolStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// All configured pools, served from cache while it is fresh.
    ///
    /// Entries whose names do not parse as `image:machine-type[:public]`
    /// are skipped with a warning rather than failing the whole read.
    pub fn pools(&self) -> StoreResult<Vec<PoolSpec>> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(snapshot) = cache.as_ref()
                && snapshot.fetched_at.elapsed() < self.ttl
            {
                return Ok(snapshot.pools.clone());
            }
        }
        self.refresh()
    }

    /// Re-read the pool configs from the store and replace the cache.
    pub fn refresh(&self) -> StoreResult<Vec<PoolSpec>> {
        let configs = self.store.pool_configs()?;
        let mut pools = Vec::with_capacity(configs.len());
        for (name, target_size) in configs {
            match PoolSpec::from_entry(&name, target_size) {
                Some(spec) => pools.push(spec),
                None => warn!(pool = %name, "skipping malformed pool config entry"),
            }
        }
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = Some(Snapshot {
            fetched_at: Instant::now(),
            pools: pools.clone(),
        });
        Ok(pools)
    }

    /// Look up one pool by name.
    pub fn get(&self, pool_name: &str) -> StoreResult<Option<PoolSpec>> {
        Ok(self.pools()?.into_iter().find(|p| p.name == pool_name))
    }

    /// Whether a pool with this name is configured.
    pub fn contains(&self, pool_name: &str) -> StoreResult<bool> {
        Ok(self.pools()?.iter().any(|p| p.name == pool_name))
    }

    /// Set a pool's target size and invalidate the cache.
    pub fn set(&self, pool_name: &str, target_size: u32) -> StoreResult<()> {
        self.store.set_pool_config(pool_name, target_size)?;
        self.invalidate();
        Ok(())
    }

    /// Delete a pool config and invalidate the cache. Returns true if it existed.
    pub fn delete(&self, pool_name: &str) -> StoreResult<bool> {
        let existed = self.store.delete_pool_config(pool_name)?;
        self.invalidate();
        Ok(existed)
    }

    fn invalidate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = None;
    }
}
