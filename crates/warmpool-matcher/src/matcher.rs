//! Request normalization and warm instance allocation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use warmpool_compute::{ComputeAdapter, WARMTH_COOLED, WARMTH_LABEL};
use warmpool_store::{InstanceRecord, PoolRegistry, PoolSpec, PoolStore};

use crate::error::MatcherResult;

/// An inbound request for a warm instance.
///
/// Image and machine type may arrive as full provider URLs; only the last
/// path segment matters for pool naming.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceRequest {
    pub image_name: Option<String>,
    pub machine_type: Option<String>,
    #[serde(default)]
    pub public_ip: bool,
}

/// Matches requests to pools and hands out warm instances.
pub struct Matcher {
    store: PoolStore,
    registry: PoolRegistry,
    compute: Arc<dyn ComputeAdapter>,
}

impl Matcher {
    pub fn new(store: PoolStore, registry: PoolRegistry, compute: Arc<dyn ComputeAdapter>) -> Self {
        Self {
            store,
            registry,
            compute,
        }
    }

    /// The canonical pool name a request maps to.
    ///
    /// Strips URL prefixes from the image and machine-type references, so
    /// `.../global/images/img1` and `img1` name the same pool.
    pub fn pool_name_for(&self, request: &InstanceRequest) -> String {
        let image = basename(request.image_name.as_deref());
        let machine_type = basename(request.machine_type.as_deref());
        PoolSpec::pool_name(image, machine_type, request.public_ip)
    }

    /// The configured pool matching a request, or `None`.
    pub fn match_pool(&self, request: &InstanceRequest) -> MatcherResult<Option<String>> {
        let pool_name = self.pool_name_for(request);
        info!(pool = %pool_name, "looking for configured pool matching request");
        if self.registry.contains(&pool_name)? {
            Ok(Some(pool_name))
        } else {
            Ok(None)
        }
    }

    /// Pop a live instance from a pool queue and mark it allocated.
    ///
    /// Records whose underlying instance no longer exists are discarded
    /// and the next queued record is tried; the loop is bounded by the
    /// queue reporting empty. An empty queue returns `Ok(None)` without
    /// touching the provider.
    pub async fn request_instance(
        &self,
        pool_name: &str,
    ) -> MatcherResult<Option<InstanceRecord>> {
        loop {
            let Some(record) = self.store.queue_pop::<InstanceRecord>(pool_name)? else {
                return Ok(None);
            };

            if self
                .compute
                .get_instance(&record.name, &record.zone)
                .await?
                .is_none()
            {
                warn!(
                    name = %record.name,
                    pool = %pool_name,
                    "discarding stale record for a vanished instance"
                );
                continue;
            }

            let mut labels = HashMap::new();
            labels.insert(WARMTH_LABEL.to_string(), WARMTH_COOLED.to_string());
            self.compute
                .set_labels(&record.name, &record.zone, &labels)
                .await?;

            info!(name = %record.name, pool = %pool_name, "handing out warm instance");
            return Ok(Some(record));
        }
    }
}

fn basename(reference: Option<&str>) -> &str {
    reference
        .and_then(|s| s.split('/').next_back())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warmpool_compute::fake::FakeCompute;

    const POOL: &str = "img1:n1-standard-1";

    fn test_env() -> (Matcher, PoolStore, Arc<FakeCompute>) {
        let store = PoolStore::open_in_memory().unwrap();
        let registry = PoolRegistry::new(store.clone(), Duration::ZERO);
        let fake = Arc::new(FakeCompute::new("us-central1"));
        let matcher = Matcher::new(store.clone(), registry, fake.clone());
        (matcher, store, fake)
    }

    fn request(image: &str, machine_type: &str, public_ip: bool) -> InstanceRequest {
        InstanceRequest {
            image_name: Some(image.to_string()),
            machine_type: Some(machine_type.to_string()),
            public_ip,
        }
    }

    fn record(name: &str) -> InstanceRecord {
        InstanceRecord {
            name: name.to_string(),
            zone: "us-central1-b".to_string(),
            ip: "10.10.42.86".to_string(),
            public_ip: None,
            ssh_private_key: Some("deadbeef".to_string()),
        }
    }

    fn warmed_labels() -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("warmth".to_string(), "warmed".to_string());
        labels
    }

    // ── Pool naming ────────────────────────────────────────────────

    #[test]
    fn pool_name_strips_url_prefixes() {
        let (matcher, _store, _fake) = test_env();
        let req = request(
            "https://www.googleapis.com/compute/v1/projects/p/global/images/img1",
            "https://www.googleapis.com/compute/v1/projects/p/zones/z/machineTypes/n1-standard-1",
            false,
        );
        assert_eq!(matcher.pool_name_for(&req), POOL);
    }

    #[test]
    fn pool_name_appends_public_suffix() {
        let (matcher, _store, _fake) = test_env();
        let req = request("img1", "n1-standard-1", true);
        assert_eq!(matcher.pool_name_for(&req), "img1:n1-standard-1:public");
    }

    #[test]
    fn missing_fields_produce_an_unmatchable_name() {
        let (matcher, _store, _fake) = test_env();
        let req = InstanceRequest {
            image_name: None,
            machine_type: None,
            public_ip: false,
        };
        assert_eq!(matcher.pool_name_for(&req), ":");
        assert!(matcher.match_pool(&req).unwrap().is_none());
    }

    #[test]
    fn match_pool_requires_a_configured_pool() {
        let (matcher, store, _fake) = test_env();
        let req = request("img1", "n1-standard-1", false);

        assert!(matcher.match_pool(&req).unwrap().is_none());

        store.set_pool_config(POOL, 1).unwrap();
        assert_eq!(matcher.match_pool(&req).unwrap().as_deref(), Some(POOL));
    }

    // ── Allocation ─────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let (matcher, _store, _fake) = test_env();
        let result = matcher.request_instance(POOL).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn live_instance_is_returned_and_relabeled() {
        let (matcher, store, fake) = test_env();
        fake.insert_instance("warm-job-live", "us-central1-b", warmed_labels());
        store.queue_push(POOL, &record("warm-job-live")).unwrap();

        let handed = matcher.request_instance(POOL).await.unwrap().unwrap();

        assert_eq!(handed.name, "warm-job-live");
        assert_eq!(store.queue_len(POOL).unwrap(), 0);

        let inst = fake
            .get_instance("warm-job-live", "us-central1-b")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inst.labels.get("warmth").map(String::as_str), Some("cooled"));
    }

    #[tokio::test]
    async fn stale_records_are_skipped() {
        let (matcher, store, fake) = test_env();
        // The first record has no backing instance; the second does.
        store.queue_push(POOL, &record("warm-job-stale")).unwrap();
        store.queue_push(POOL, &record("warm-job-live")).unwrap();
        fake.insert_instance("warm-job-live", "us-central1-b", warmed_labels());

        let handed = matcher.request_instance(POOL).await.unwrap().unwrap();

        assert_eq!(handed.name, "warm-job-live");
        // The stale record was discarded, not re-queued.
        assert_eq!(store.queue_len(POOL).unwrap(), 0);
    }

    #[tokio::test]
    async fn all_stale_records_drain_to_none() {
        let (matcher, store, _fake) = test_env();
        store.queue_push(POOL, &record("warm-job-a")).unwrap();
        store.queue_push(POOL, &record("warm-job-b")).unwrap();

        let result = matcher.request_instance(POOL).await.unwrap();
        assert!(result.is_none());
        assert_eq!(store.queue_len(POOL).unwrap(), 0);
    }
}
