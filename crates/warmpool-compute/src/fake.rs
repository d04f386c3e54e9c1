//! In-memory fake compute provider.
//!
//! Backs tests and the daemon's `fake` provider mode. Instances live in a
//! map keyed by `(zone, name)`; create operations can be planned to
//! succeed, be rejected outright, or stall forever (so callers exercise
//! their timeout path). Deletes can be made to fail a set number of times.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::adapter::*;
use crate::error::{ComputeError, ComputeResult};

/// Planned outcome for a `begin_create` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The create succeeds; the operation completes on the next poll.
    Succeed,
    /// The provider rejects the create call itself.
    Reject,
    /// The create is accepted but the operation never completes.
    Stall,
}

struct FakeInstance {
    addresses: InstanceAddresses,
    labels: HashMap<String, String>,
}

struct Operation {
    instance_name: String,
    zone: String,
    /// Remaining polls before `Done`; `None` stalls forever.
    polls_left: Option<u32>,
}

#[derive(Default)]
struct Inner {
    instances: HashMap<(String, String), FakeInstance>,
    operations: HashMap<String, Operation>,
    planned_creates: VecDeque<CreateOutcome>,
    failing_deletes: u32,
    failing_lists: u32,
    op_seq: u64,
}

/// An in-memory [`ComputeAdapter`].
pub struct FakeCompute {
    region: String,
    /// Polls before a successful operation reports `Done`.
    polls_until_done: u32,
    inner: Mutex<Inner>,
}

impl FakeCompute {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            polls_until_done: 0,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make successful operations stay `Pending` for `n` polls.
    pub fn with_polls_until_done(mut self, n: u32) -> Self {
        self.polls_until_done = n;
        self
    }

    /// Queue the outcome for an upcoming `begin_create` call.
    ///
    /// Outcomes are consumed in call order; calls with no planned outcome
    /// succeed.
    pub fn plan_create(&self, outcome: CreateOutcome) {
        self.lock().planned_creates.push_back(outcome);
    }

    /// Make the next `n` delete calls fail.
    pub fn fail_next_deletes(&self, n: u32) {
        self.lock().failing_deletes = n;
    }

    /// Make the next `n` list calls fail.
    pub fn fail_next_lists(&self, n: u32) {
        self.lock().failing_lists = n;
    }

    /// Number of instances currently "running".
    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    /// Whether an instance exists.
    pub fn has_instance(&self, name: &str, zone: &str) -> bool {
        self.lock()
            .instances
            .contains_key(&(zone.to_string(), name.to_string()))
    }

    /// Insert an instance directly, bypassing the create flow (test setup).
    pub fn insert_instance(&self, name: &str, zone: &str, labels: HashMap<String, String>) {
        self.lock().instances.insert(
            (zone.to_string(), name.to_string()),
            FakeInstance {
                addresses: InstanceAddresses {
                    ip: "10.10.42.86".to_string(),
                    public_ip: None,
                },
                labels,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ComputeAdapter for FakeCompute {
    async fn zones(&self) -> ComputeResult<Vec<String>> {
        Ok(["a", "b", "c", "f"]
            .iter()
            .map(|suffix| format!("{}-{suffix}", self.region))
            .collect())
    }

    async fn begin_create(&self, req: &CreateInstance) -> ComputeResult<OperationHandle> {
        let mut inner = self.lock();
        let outcome = inner
            .planned_creates
            .pop_front()
            .unwrap_or(CreateOutcome::Succeed);

        if outcome == CreateOutcome::Reject {
            return Err(ComputeError::Provider(format!(
                "insert {} rejected",
                req.name
            )));
        }

        let polls_left = match outcome {
            CreateOutcome::Stall => None,
            _ => Some(self.polls_until_done),
        };

        inner.op_seq += 1;
        let op_id = format!("operation-{}", inner.op_seq);
        inner.operations.insert(op_id.clone(), Operation {
            instance_name: req.name.clone(),
            zone: req.zone.clone(),
            polls_left,
        });

        let public_ip = req.public_ip.then(|| "10.54.54.54".to_string());
        let mut labels = HashMap::new();
        labels.insert(WARMTH_LABEL.to_string(), WARMTH_WARMED.to_string());
        inner.instances.insert(
            (req.zone.clone(), req.name.clone()),
            FakeInstance {
                addresses: InstanceAddresses {
                    ip: "10.10.42.86".to_string(),
                    public_ip,
                },
                labels,
            },
        );

        debug!(name = %req.name, zone = %req.zone, op = %op_id, "fake create issued");
        Ok(OperationHandle {
            id: op_id,
            zone: req.zone.clone(),
            instance_name: req.name.clone(),
        })
    }

    async fn poll_operation(&self, op: &OperationHandle) -> ComputeResult<OperationStatus> {
        let mut inner = self.lock();
        let operation = inner
            .operations
            .get_mut(&op.id)
            .ok_or_else(|| ComputeError::UnknownOperation(op.id.clone()))?;

        match operation.polls_left {
            None => Ok(OperationStatus::Pending),
            Some(0) => Ok(OperationStatus::Done),
            Some(ref mut n) => {
                *n -= 1;
                Ok(OperationStatus::Pending)
            }
        }
    }

    async fn describe(&self, name: &str, zone: &str) -> ComputeResult<Option<InstanceAddresses>> {
        let inner = self.lock();
        Ok(inner
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .map(|inst| inst.addresses.clone()))
    }

    async fn get_instance(&self, name: &str, zone: &str) -> ComputeResult<Option<CloudInstance>> {
        let inner = self.lock();
        Ok(inner
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .map(|inst| CloudInstance {
                name: name.to_string(),
                zone: zone.to_string(),
                labels: inst.labels.clone(),
            }))
    }

    async fn delete_instance(&self, name: &str, zone: &str) -> ComputeResult<()> {
        let mut inner = self.lock();
        if inner.failing_deletes > 0 {
            inner.failing_deletes -= 1;
            return Err(ComputeError::Provider(format!("delete {name} failed")));
        }
        // Deleting a nonexistent instance is success.
        inner
            .instances
            .remove(&(zone.to_string(), name.to_string()));
        debug!(%name, %zone, "fake instance deleted");
        Ok(())
    }

    async fn list_instances(&self, filter: &LabelFilter) -> ComputeResult<Vec<CloudInstance>> {
        let mut inner = self.lock();
        if inner.failing_lists > 0 {
            inner.failing_lists -= 1;
            return Err(ComputeError::Provider("list failed".to_string()));
        }
        Ok(inner
            .instances
            .iter()
            .filter(|(_, inst)| filter.matches(&inst.labels))
            .map(|((zone, name), inst)| CloudInstance {
                name: name.clone(),
                zone: zone.clone(),
                labels: inst.labels.clone(),
            })
            .collect())
    }

    async fn set_labels(
        &self,
        name: &str,
        zone: &str,
        labels: &HashMap<String, String>,
    ) -> ComputeResult<()> {
        let mut inner = self.lock();
        let inst = inner
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
            .ok_or_else(|| ComputeError::Provider(format!("no such instance: {name}")))?;
        for (k, v) in labels {
            inst.labels.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}
