//! Domain types for the instance manager: instances, cloud instances,
//! observed node state, and node-type configuration.

use crate::state_machine::InstanceStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for an IM-managed instance.
pub type InstanceId = String;

/// Unique identifier assigned by the cloud provider to a launched VM.
pub type CloudInstanceId = String;

/// Unique identifier for a ray/worker node.
pub type NodeId = String;

/// Identifier correlating a launch (or terminate) request with its outcome.
pub type RequestId = String;

/// A node-type name, e.g. "gpu-large".
pub type NodeTypeName = String;

/// A resource name, e.g. "CPU", "GPU", "memory".
pub type ResourceName = String;

/// A bundle of resource quantities to be placed atomically on one node.
pub type ResourceBundle = HashMap<ResourceName, f64>;

/// A monotonically increasing nanosecond timestamp, as supplied by the
/// caller. The core never reads the wall clock itself.
pub type TimestampNs = u64;

// ── Instance ──────────────────────────────────────────────────────

/// A single `(status, timestamp)` entry in an instance's transition history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub status: InstanceStatus,
    pub timestamp_ns: TimestampNs,
}

/// An instance managed by the Instance Manager.
///
/// Created in QUEUED and never resurrected once it reaches a terminal
/// status. `history` is append-only and is the source of truth for
/// [`Instance::status_transition_time`], which the allocation pass relies
/// on for FIFO ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub instance_type: NodeTypeName,
    pub status: InstanceStatus,
    pub cloud_instance_id: Option<CloudInstanceId>,
    pub launch_request_id: Option<RequestId>,
    pub launch_config_hash: Option<String>,
    pub history: Vec<StatusTransition>,
}

impl Instance {
    /// A freshly-queued instance with an empty history save for its initial
    /// QUEUED transition.
    pub fn new(instance_id: InstanceId, instance_type: NodeTypeName, now_ns: TimestampNs) -> Self {
        Instance {
            instance_id,
            instance_type,
            status: InstanceStatus::Queued,
            cloud_instance_id: None,
            launch_request_id: None,
            launch_config_hash: None,
            history: vec![StatusTransition {
                status: InstanceStatus::Queued,
                timestamp_ns: now_ns,
            }],
        }
    }

    /// The timestamp at which this instance first entered `status`, if it
    /// ever did.
    pub fn status_transition_time(&self, status: InstanceStatus) -> Option<TimestampNs> {
        self.history
            .iter()
            .find(|t| t.status == status)
            .map(|t| t.timestamp_ns)
    }
}

// ── CloudInstance ─────────────────────────────────────────────────

/// A VM as observed from the cloud provider. Lifecycle is owned by the
/// provider collaborator; the core never mutates this directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInstance {
    pub cloud_instance_id: CloudInstanceId,
    pub node_type: NodeTypeName,
    pub launch_request_id: Option<RequestId>,
}

// ── NodeState ─────────────────────────────────────────────────────

/// Coarse observed state of a live ray/worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RayNodeStatus {
    Running,
    Idle,
    Draining,
    Dead,
}

/// Observed state of a live node, as reported by the membership/gossip
/// layer. Back-linked to its `CloudInstance` via `cloud_instance_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: NodeId,
    pub cloud_instance_id: Option<CloudInstanceId>,
    pub ray_node_type_name: NodeTypeName,
    pub total_resources: ResourceBundle,
    pub available_resources: ResourceBundle,
    pub idle_duration_ms: u64,
    pub status: RayNodeStatus,
}

// ── NodeTypeConfig ────────────────────────────────────────────────

/// Static configuration for a worker shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    pub name: NodeTypeName,
    pub resources: ResourceBundle,
    pub labels: HashMap<String, String>,
    pub min_worker_nodes: u32,
    pub max_worker_nodes: u32,
    pub launch_config_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_starts_queued_with_one_history_entry() {
        let inst = Instance::new("i-1".into(), "t1".into(), 1000);
        assert_eq!(inst.status, InstanceStatus::Queued);
        assert_eq!(inst.history.len(), 1);
        assert_eq!(inst.status_transition_time(InstanceStatus::Queued), Some(1000));
        assert_eq!(inst.status_transition_time(InstanceStatus::Requested), None);
    }
}
