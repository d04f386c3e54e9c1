//! Domain types for the warmpool store.
//!
//! These are the records persisted in queue entries plus the parsed view
//! of a pool configuration. All queue values are serialized to/from JSON.

use serde::{Deserialize, Serialize};

/// Fixed name of the queue holding suspected-orphan records.
pub const ORPHAN_QUEUE: &str = "orphaned";

/// A warmed instance waiting in a pool queue.
///
/// Created by the instance checker on successful provisioning, consumed
/// by the matcher on allocation (or by the orphan sweep). The owning pool
/// name is not stored in the record; it is the name of the containing
/// queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    pub name: String,
    pub zone: String,
    /// Private network address.
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// Opaque per-instance credential generated at provision time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_private_key: Option<String>,
}

/// A cloud instance whose provisioning outcome is unknown.
///
/// Pushed onto the orphan queue when a create call fails or times out
/// after the instance identity was already generated. The cleanup sweep
/// issues one best-effort delete per record and never re-queues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanRecord {
    pub name: String,
    pub zone: String,
}

/// A pool configuration: what to provision and how many to keep warm.
///
/// The pool name doubles as the queue key and is derived deterministically
/// from the image name and machine type (plus a `:public` suffix for pools
/// whose instances get an external address).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSpec {
    pub name: String,
    pub image_name: String,
    pub machine_type: String,
    pub public_ip: bool,
    pub target_size: u32,
}

impl PoolSpec {
    /// Derive the canonical pool name: `<image>:<machine-type>[:public]`.
    pub fn pool_name(image_name: &str, machine_type: &str, public_ip: bool) -> String {
        let mut name = format!("{image_name}:{machine_type}");
        if public_ip {
            name.push_str(":public");
        }
        name
    }

    /// Parse a stored `name → target_size` entry back into a spec.
    ///
    /// Returns `None` when the name does not have at least the
    /// `image:machine-type` segments.
    pub fn from_entry(name: &str, target_size: u32) -> Option<Self> {
        let mut parts = name.split(':');
        let image_name = parts.next().filter(|s| !s.is_empty())?.to_string();
        let machine_type = parts.next().filter(|s| !s.is_empty())?.to_string();
        let public_ip = matches!(parts.next(), Some("public"));
        Some(Self {
            name: name.to_string(),
            image_name,
            machine_type,
            public_ip,
            target_size,
        })
    }
}
