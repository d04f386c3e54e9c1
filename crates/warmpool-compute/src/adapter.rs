//! The `ComputeAdapter` trait and its request/response types.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ComputeResult;

/// Label key marking instances managed by warmpool.
pub const WARMTH_LABEL: &str = "warmth";

/// Label value for instances waiting in a pool.
pub const WARMTH_WARMED: &str = "warmed";

/// Label value for instances handed out to a caller.
pub const WARMTH_COOLED: &str = "cooled";

/// A create request for one instance.
///
/// The name is generated by the caller (see [`CreateInstance::new`]) so
/// that the instance identity is known even when the provider call fails
/// mid-flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstance {
    pub name: String,
    pub zone: String,
    pub image_name: String,
    pub machine_type: String,
    /// Attach an external (NAT) address.
    pub public_ip: bool,
}

impl CreateInstance {
    /// Build a request with a fresh client-side instance name.
    ///
    /// Names embed a random token so repeated create attempts never
    /// collide.
    pub fn new(zone: &str, image_name: &str, machine_type: &str, public_ip: bool) -> Self {
        Self {
            name: format!("warm-job-{}", Uuid::new_v4()),
            zone: zone.to_string(),
            image_name: image_name.to_string(),
            machine_type: machine_type.to_string(),
            public_ip,
        }
    }
}

/// Handle to an in-flight provider operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// Provider-side operation identifier.
    pub id: String,
    pub zone: String,
    /// Name of the instance the operation is creating.
    pub instance_name: String,
}

/// Status of a polled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done,
}

/// Network addresses of a provisioned instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceAddresses {
    pub ip: String,
    pub public_ip: Option<String>,
}

/// A provider-side instance as seen by `get`/`list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudInstance {
    pub name: String,
    pub zone: String,
    pub labels: HashMap<String, String>,
}

/// A `labels.<key>:<value>` filter for list calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub key: String,
    pub value: String,
}

impl LabelFilter {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// The filter selecting warmed (pool-resident) instances.
    pub fn warmed() -> Self {
        Self::new(WARMTH_LABEL, WARMTH_WARMED)
    }

    /// Whether an instance's labels match this filter.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        labels.get(&self.key).map(String::as_str) == Some(self.value.as_str())
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "labels.{}:{}", self.key, self.value)
    }
}

/// Abstraction over a cloud compute provider.
///
/// All methods are fallible and async; implementations must be safe to
/// share across tasks (`Send + Sync`). `delete_instance` treats "already
/// gone" as success so orphan cleanup can be retried harmlessly.
#[async_trait]
pub trait ComputeAdapter: Send + Sync {
    /// Zones available in the configured region.
    async fn zones(&self) -> ComputeResult<Vec<String>>;

    /// Issue a create call; returns the operation handle to poll.
    async fn begin_create(&self, req: &CreateInstance) -> ComputeResult<OperationHandle>;

    /// Poll an in-flight create operation.
    async fn poll_operation(&self, op: &OperationHandle) -> ComputeResult<OperationStatus>;

    /// Network addresses of a finished instance, or `None` if it does
    /// not exist.
    async fn describe(&self, name: &str, zone: &str) -> ComputeResult<Option<InstanceAddresses>>;

    /// Look up an instance, or `None` if it does not exist.
    async fn get_instance(&self, name: &str, zone: &str) -> ComputeResult<Option<CloudInstance>>;

    /// Delete an instance. Deleting a nonexistent instance is success.
    async fn delete_instance(&self, name: &str, zone: &str) -> ComputeResult<()>;

    /// List instances whose labels match the filter, across all zones.
    async fn list_instances(&self, filter: &LabelFilter) -> ComputeResult<Vec<CloudInstance>>;

    /// Merge the given labels onto an instance.
    async fn set_labels(
        &self,
        name: &str,
        zone: &str,
        labels: &HashMap<String, String>,
    ) -> ComputeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requests_get_unique_names() {
        let a = CreateInstance::new("us-central1-b", "img1", "n1-standard-1", false);
        let b = CreateInstance::new("us-central1-b", "img1", "n1-standard-1", false);
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with("warm-job-"));
    }

    #[test]
    fn label_filter_formats_like_provider_syntax() {
        assert_eq!(LabelFilter::warmed().to_string(), "labels.warmth:warmed");
    }

    #[test]
    fn label_filter_matching() {
        let filter = LabelFilter::warmed();
        let mut labels = HashMap::new();
        assert!(!filter.matches(&labels));

        labels.insert("warmth".to_string(), "warmed".to_string());
        assert!(filter.matches(&labels));

        labels.insert("warmth".to_string(), "cooled".to_string());
        assert!(!filter.matches(&labels));
    }
}
