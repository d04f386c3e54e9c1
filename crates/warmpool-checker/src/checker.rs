//! InstanceChecker — the reconciliation loop.
//!
//! Drives create/delete decisions against the compute provider and keeps
//! the pool store's queues converging on the configured target sizes.
//! Runs strictly sequentially: one `check_pools` pass, including all
//! provisioning waits, completes before the next begins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use warmpool_compute::{
    ComputeAdapter, CreateInstance, LabelFilter, OperationHandle, OperationStatus,
};
use warmpool_store::{
    InstanceRecord, ORPHAN_QUEUE, OrphanRecord, PoolRegistry, PoolSpec, PoolStore,
};

use crate::budget::ErrorBudget;
use crate::error::CheckerResult;

/// Tunables for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Pause between `check_pools` passes.
    pub pool_check_interval: Duration,
    /// Error-budget window length.
    pub error_interval: Duration,
    /// Consecutive failures tolerated inside one window.
    pub max_error_count: u32,
    /// Allowed excess of warmed-in-provider over tracked-in-store before
    /// the sizing pass is skipped.
    pub orphan_threshold: u64,
    /// How long to wait for a create operation before declaring the
    /// instance a suspected orphan.
    pub vm_creation_timeout: Duration,
    /// Pause between polls of an in-flight create operation.
    pub operation_poll_interval: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            pool_check_interval: Duration::from_secs(1),
            error_interval: Duration::from_secs(60),
            max_error_count: 60,
            orphan_threshold: 0,
            vm_creation_timeout: Duration::from_secs(90),
            operation_poll_interval: Duration::from_secs(10),
        }
    }
}

/// The pool reconciliation engine.
///
/// All collaborators are injected at construction so tests can substitute
/// an in-memory store and a fake provider.
pub struct InstanceChecker {
    store: PoolStore,
    registry: PoolRegistry,
    compute: Arc<dyn ComputeAdapter>,
    config: CheckerConfig,
}

impl InstanceChecker {
    pub fn new(
        store: PoolStore,
        registry: PoolRegistry,
        compute: Arc<dyn ComputeAdapter>,
        config: CheckerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            compute,
            config,
        }
    }

    /// Run the reconciliation loop until shutdown or budget exhaustion.
    ///
    /// Errors from `check_pools` are logged and charged to the error
    /// budget; once a burst of `max_error_count` failures lands inside one
    /// `error_interval` window the loop returns. The daemon treats that
    /// return as fatal and exits so a supervisor can restart the process.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut budget = ErrorBudget::new(self.config.error_interval, self.config.max_error_count);
        info!(
            interval_secs = self.config.pool_check_interval.as_secs(),
            "instance checker started"
        );

        loop {
            if let Err(e) = self.check_pools().await {
                error!(error = %e, window_errors = budget.count() + 1, "pool check failed");
                if budget.record() {
                    error!("too many errors, no longer checking instance pools");
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.pool_check_interval) => {}
                _ = shutdown.changed() => {
                    info!("instance checker shutting down");
                    return;
                }
            }
        }
    }

    /// One reconciliation pass: orphan sweep, divergence check, sizing.
    pub async fn check_pools(&self) -> CheckerResult<()> {
        // Sweep first so orphan accounting is fresh before the threshold
        // check below.
        self.clean_up_orphans(ORPHAN_QUEUE).await?;

        let pools = self.registry.pools()?;
        let warmed = self.warmed_instance_count().await?;
        let tracked = self.tracked_instance_count(&pools)?;

        if warmed.saturating_sub(tracked) > self.config.orphan_threshold {
            warn!(
                warmed,
                tracked,
                threshold = self.config.orphan_threshold,
                "too many untracked warmed instances, skipping sizing pass"
            );
            return Ok(());
        }

        debug!(pools = pools.len(), warmed, tracked, "checking warmed pools");
        for pool in &pools {
            let current = self.store.queue_len(&pool.name)?;
            debug!(pool = %pool.name, current, target = pool.target_size, "checked pool size");
            if current < u64::from(pool.target_size) {
                self.increase_size(pool).await?;
            }
        }
        Ok(())
    }

    /// Top a pool up to its target size.
    ///
    /// Creations run sequentially; a failed creation is recorded (as an
    /// orphan when the identity already exists) and never aborts the rest
    /// of the batch. Returns the number of records pushed.
    pub async fn increase_size(&self, pool: &PoolSpec) -> CheckerResult<u64> {
        let current = self.store.queue_len(&pool.name)?;
        let deficit = u64::from(pool.target_size).saturating_sub(current);
        info!(pool = %pool.name, current, deficit, "increasing pool size");

        let mut created = 0;
        for _ in 0..deficit {
            if let Some(record) = self.provision_instance(pool).await? {
                self.store.queue_push(&pool.name, &record)?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Pop every orphan present at sweep start and best-effort delete it.
    ///
    /// The loop is bounded by the starting length so orphans added
    /// concurrently are deferred to the next cycle. Records are removed
    /// regardless of delete outcome; a failed delete is logged, not
    /// re-queued.
    pub async fn clean_up_orphans(&self, queue: &str) -> CheckerResult<u64> {
        let num_orphans = self.store.queue_len(queue)?;
        if num_orphans == 0 {
            return Ok(0);
        }
        info!(queue, orphans = num_orphans, "cleaning up orphan queue");

        let mut swept = 0;
        for _ in 0..num_orphans {
            let Some(orphan) = self.store.queue_pop::<OrphanRecord>(queue)? else {
                break;
            };
            swept += 1;
            if let Err(e) = self
                .compute
                .delete_instance(&orphan.name, &orphan.zone)
                .await
            {
                error!(
                    name = %orphan.name,
                    zone = %orphan.zone,
                    error = %e,
                    "failed to delete orphaned instance"
                );
            }
        }
        Ok(swept)
    }

    // ── Provisioning ───────────────────────────────────────────────

    /// Provision one instance for a pool.
    ///
    /// Returns `Ok(None)` when the attempt failed; any failure after the
    /// instance identity exists pushes exactly one orphan record. Only
    /// store errors propagate.
    async fn provision_instance(&self, pool: &PoolSpec) -> CheckerResult<Option<InstanceRecord>> {
        let zone = match self.pick_zone().await {
            Some(zone) => zone,
            None => return Ok(None),
        };

        // The identity (name + zone) exists from here on; every failure
        // path below must record an orphan.
        let req = CreateInstance::new(&zone, &pool.image_name, &pool.machine_type, pool.public_ip);

        let op = match self.compute.begin_create(&req).await {
            Ok(op) => op,
            Err(e) => {
                error!(name = %req.name, %zone, error = %e, "create call failed, recording orphan");
                self.push_orphan(&req.name, &zone)?;
                return Ok(None);
            }
        };

        if !self.wait_for_operation(&op).await? {
            return Ok(None);
        }

        let addresses = match self.compute.describe(&req.name, &zone).await {
            Ok(Some(addresses)) => addresses,
            Ok(None) => {
                error!(name = %req.name, %zone, "created instance not found, recording orphan");
                self.push_orphan(&req.name, &zone)?;
                return Ok(None);
            }
            Err(e) => {
                error!(name = %req.name, %zone, error = %e, "failed to describe new instance, recording orphan");
                self.push_orphan(&req.name, &zone)?;
                return Ok(None);
            }
        };

        info!(name = %req.name, %zone, ip = %addresses.ip, "new instance is live");
        Ok(Some(InstanceRecord {
            name: req.name,
            zone,
            ip: addresses.ip,
            public_ip: addresses.public_ip,
            ssh_private_key: Some(ephemeral_key()),
        }))
    }

    /// Poll a create operation until done or timed out.
    ///
    /// Returns `Ok(true)` on completion; timeout and poll errors record an
    /// orphan and return `Ok(false)`.
    async fn wait_for_operation(&self, op: &OperationHandle) -> CheckerResult<bool> {
        let started = Instant::now();
        loop {
            match self.compute.poll_operation(op).await {
                Ok(OperationStatus::Done) => return Ok(true),
                Ok(OperationStatus::Pending) => {}
                Err(e) => {
                    error!(
                        name = %op.instance_name,
                        zone = %op.zone,
                        error = %e,
                        "operation poll failed, recording orphan"
                    );
                    self.push_orphan(&op.instance_name, &op.zone)?;
                    return Ok(false);
                }
            }

            if started.elapsed() >= self.config.vm_creation_timeout {
                error!(
                    name = %op.instance_name,
                    zone = %op.zone,
                    "timed out waiting for create operation, recording orphan"
                );
                self.push_orphan(&op.instance_name, &op.zone)?;
                return Ok(false);
            }
            tokio::time::sleep(self.config.operation_poll_interval).await;
        }
    }

    fn push_orphan(&self, name: &str, zone: &str) -> CheckerResult<()> {
        self.store.queue_push(ORPHAN_QUEUE, &OrphanRecord {
            name: name.to_string(),
            zone: zone.to_string(),
        })?;
        Ok(())
    }

    async fn pick_zone(&self) -> Option<String> {
        match self.compute.zones().await {
            Ok(zones) if !zones.is_empty() => {
                let idx = rand::thread_rng().gen_range(0..zones.len());
                Some(zones[idx].clone())
            }
            Ok(_) => {
                error!("provider reported no zones, cannot create instance");
                None
            }
            Err(e) => {
                error!(error = %e, "failed to list zones, cannot create instance");
                None
            }
        }
    }

    // ── Accounting ─────────────────────────────────────────────────

    /// Instances actually carrying the warmed label in the provider.
    async fn warmed_instance_count(&self) -> CheckerResult<u64> {
        let instances = self.compute.list_instances(&LabelFilter::warmed()).await?;
        Ok(instances.len() as u64)
    }

    /// Records tracked across all configured pool queues.
    fn tracked_instance_count(&self, pools: &[PoolSpec]) -> CheckerResult<u64> {
        let mut total = 0;
        for pool in pools {
            total += self.store.queue_len(&pool.name)?;
        }
        Ok(total)
    }
}

/// Opaque per-instance credential, generated at provision time.
fn ephemeral_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warmpool_compute::fake::{CreateOutcome, FakeCompute};

    const POOL: &str = "img1:n1-standard-1";

    fn test_config() -> CheckerConfig {
        CheckerConfig {
            pool_check_interval: Duration::from_millis(1),
            error_interval: Duration::from_secs(60),
            max_error_count: 3,
            orphan_threshold: 0,
            // Zero waits so stalled operations orphan immediately.
            vm_creation_timeout: Duration::ZERO,
            operation_poll_interval: Duration::ZERO,
        }
    }

    fn test_env() -> (InstanceChecker, PoolStore, Arc<FakeCompute>) {
        let store = PoolStore::open_in_memory().unwrap();
        let registry = PoolRegistry::new(store.clone(), Duration::ZERO);
        let fake = Arc::new(FakeCompute::new("us-central1"));
        let checker = InstanceChecker::new(
            store.clone(),
            registry,
            fake.clone(),
            test_config(),
        );
        (checker, store, fake)
    }

    fn warmed_labels() -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("warmth".to_string(), "warmed".to_string());
        labels
    }

    fn pool(target_size: u32) -> PoolSpec {
        PoolSpec::from_entry(POOL, target_size).unwrap()
    }

    // ── increase_size ──────────────────────────────────────────────

    #[tokio::test]
    async fn increase_size_fills_to_target() {
        let (checker, store, fake) = test_env();

        let created = checker.increase_size(&pool(2)).await.unwrap();

        assert_eq!(created, 2);
        assert_eq!(store.queue_len(POOL).unwrap(), 2);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 0);
        assert_eq!(fake.instance_count(), 2);

        let record: InstanceRecord = store.queue_pop(POOL).unwrap().unwrap();
        assert!(record.name.starts_with("warm-job-"));
        assert_eq!(record.ip, "10.10.42.86");
        assert!(record.ssh_private_key.is_some());
    }

    #[tokio::test]
    async fn increase_size_respects_existing_records() {
        let (checker, store, _fake) = test_env();
        checker.increase_size(&pool(1)).await.unwrap();

        let created = checker.increase_size(&pool(2)).await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(store.queue_len(POOL).unwrap(), 2);
    }

    #[tokio::test]
    async fn public_pool_records_carry_a_public_ip() {
        let (checker, store, _fake) = test_env();
        let public_pool = PoolSpec::from_entry("img1:n1-standard-1:public", 1).unwrap();

        checker.increase_size(&public_pool).await.unwrap();
        let record: InstanceRecord = store
            .queue_pop("img1:n1-standard-1:public")
            .unwrap()
            .unwrap();
        assert_eq!(record.public_ip.as_deref(), Some("10.54.54.54"));
    }

    #[tokio::test]
    async fn timed_out_create_becomes_an_orphan() {
        let (checker, store, fake) = test_env();
        fake.plan_create(CreateOutcome::Succeed);
        fake.plan_create(CreateOutcome::Stall);

        let created = checker.increase_size(&pool(2)).await.unwrap();

        assert_eq!(created, 1);
        assert_eq!(store.queue_len(POOL).unwrap(), 1);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 1);

        let pooled: InstanceRecord = store.queue_pop(POOL).unwrap().unwrap();
        let orphan: OrphanRecord = store.queue_pop(ORPHAN_QUEUE).unwrap().unwrap();
        assert!(orphan.name.starts_with("warm-job-"));
        assert_ne!(orphan.name, pooled.name);
    }

    #[tokio::test]
    async fn rejected_create_becomes_an_orphan() {
        let (checker, store, fake) = test_env();
        fake.plan_create(CreateOutcome::Reject);

        let created = checker.increase_size(&pool(1)).await.unwrap();

        // The name was generated before the call, so the failure is
        // recorded even though nothing may exist provider-side.
        assert_eq!(created, 0);
        assert_eq!(store.queue_len(POOL).unwrap(), 0);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_create_does_not_abort_the_batch() {
        let (checker, store, fake) = test_env();
        fake.plan_create(CreateOutcome::Reject);
        fake.plan_create(CreateOutcome::Succeed);
        fake.plan_create(CreateOutcome::Succeed);

        let created = checker.increase_size(&pool(3)).await.unwrap();

        assert_eq!(created, 2);
        assert_eq!(store.queue_len(POOL).unwrap(), 2);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 1);
    }

    // ── clean_up_orphans ───────────────────────────────────────────

    #[tokio::test]
    async fn orphan_sweep_on_empty_queue_is_a_noop() {
        let (checker, store, _fake) = test_env();
        let swept = checker.clean_up_orphans(ORPHAN_QUEUE).await.unwrap();
        assert_eq!(swept, 0);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn orphan_sweep_deletes_instances() {
        let (checker, store, fake) = test_env();
        fake.insert_instance("orphan-1", "us-central1-b", warmed_labels());
        fake.insert_instance("orphan-2", "us-central1-f", warmed_labels());
        for (name, zone) in [("orphan-1", "us-central1-b"), ("orphan-2", "us-central1-f")] {
            store
                .queue_push(ORPHAN_QUEUE, &OrphanRecord {
                    name: name.to_string(),
                    zone: zone.to_string(),
                })
                .unwrap();
        }

        let swept = checker.clean_up_orphans(ORPHAN_QUEUE).await.unwrap();

        assert_eq!(swept, 2);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 0);
        assert_eq!(fake.instance_count(), 0);
    }

    #[tokio::test]
    async fn failed_orphan_delete_is_not_requeued() {
        let (checker, store, fake) = test_env();
        fake.insert_instance("sticky", "us-central1-b", warmed_labels());
        store
            .queue_push(ORPHAN_QUEUE, &OrphanRecord {
                name: "sticky".to_string(),
                zone: "us-central1-b".to_string(),
            })
            .unwrap();
        fake.fail_next_deletes(1);

        let swept = checker.clean_up_orphans(ORPHAN_QUEUE).await.unwrap();

        // Popped and attempted once; the record is gone even though the
        // instance survived.
        assert_eq!(swept, 1);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 0);
        assert!(fake.has_instance("sticky", "us-central1-b"));
    }

    // ── check_pools ────────────────────────────────────────────────

    #[tokio::test]
    async fn check_pools_tops_up_configured_pools() {
        let (checker, store, _fake) = test_env();
        store.set_pool_config(POOL, 2).unwrap();

        checker.check_pools().await.unwrap();

        assert_eq!(store.queue_len(POOL).unwrap(), 2);
        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn check_pools_is_convergent() {
        let (checker, store, fake) = test_env();
        store.set_pool_config(POOL, 2).unwrap();

        checker.check_pools().await.unwrap();
        checker.check_pools().await.unwrap();

        assert_eq!(store.queue_len(POOL).unwrap(), 2);
        assert_eq!(fake.instance_count(), 2);
    }

    #[tokio::test]
    async fn check_pools_skips_sizing_when_divergence_exceeds_threshold() {
        let (checker, store, fake) = test_env();
        store.set_pool_config(POOL, 5).unwrap();

        // 5 warmed in the provider, 3 tracked in the store.
        for i in 0..5 {
            fake.insert_instance(&format!("warm-{i}"), "us-central1-b", warmed_labels());
        }
        for i in 0..3 {
            store
                .queue_push(POOL, &InstanceRecord {
                    name: format!("warm-{i}"),
                    zone: "us-central1-b".to_string(),
                    ip: "10.10.42.86".to_string(),
                    public_ip: None,
                    ssh_private_key: None,
                })
                .unwrap();
        }

        checker.check_pools().await.unwrap();

        // Sizing pass aborted: nothing created, queue untouched.
        assert_eq!(store.queue_len(POOL).unwrap(), 3);
        assert_eq!(fake.instance_count(), 5);
    }

    #[tokio::test]
    async fn check_pools_sweeps_orphans_before_the_threshold_check() {
        let (checker, store, fake) = test_env();
        store.set_pool_config(POOL, 1).unwrap();

        // One untracked warmed instance, already queued for cleanup. The
        // sweep deletes it first, so the divergence check passes and the
        // pool still gets filled.
        fake.insert_instance("leftover", "us-central1-b", warmed_labels());
        store
            .queue_push(ORPHAN_QUEUE, &OrphanRecord {
                name: "leftover".to_string(),
                zone: "us-central1-b".to_string(),
            })
            .unwrap();

        checker.check_pools().await.unwrap();

        assert_eq!(store.queue_len(ORPHAN_QUEUE).unwrap(), 0);
        assert_eq!(store.queue_len(POOL).unwrap(), 1);
    }

    #[tokio::test]
    async fn check_pools_propagates_list_failures() {
        let (checker, store, fake) = test_env();
        store.set_pool_config(POOL, 1).unwrap();
        fake.fail_next_lists(1);

        assert!(checker.check_pools().await.is_err());
        assert_eq!(store.queue_len(POOL).unwrap(), 0);
    }

    // ── run loop ───────────────────────────────────────────────────

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let (checker, _store, _fake) = test_env();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { checker.run(shutdown_rx).await });
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("checker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_the_error_budget_is_exhausted() {
        let (checker, store, fake) = test_env();
        store.set_pool_config(POOL, 1).unwrap();
        // Every pass fails inside one 60s window; max_error_count is 3.
        fake.fail_next_lists(u32::MAX);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { checker.run(shutdown_rx).await });

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("checker did not give up")
            .unwrap();
    }
}
