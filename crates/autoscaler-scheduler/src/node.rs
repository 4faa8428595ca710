//! SchedulingNode: the scheduler's ephemeral, virtual view of a cluster
//! node used while computing one tick's placement decisions.

use autoscaler_types::{InstanceId, NodeState, NodeTypeConfig, NodeTypeName, ResourceBundle};
use std::collections::HashMap;

/// Lifecycle status of a virtual scheduling node, distinct from (but
/// derived from) the underlying instance's state-machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    ToLaunch,
    Pending,
    Running,
    ToTerminate,
}

/// One bundle committed to a node, from either an ordinary/gang resource
/// request or a cluster resource constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedRequest {
    pub bundle: ResourceBundle,
}

/// A virtual node carrying capacity, committed bundles, and enough
/// identity to translate a tick's decisions back into IM transitions.
#[derive(Debug, Clone)]
pub struct SchedulingNode {
    pub node_type: NodeTypeName,
    pub total_resources: ResourceBundle,
    /// Consumed by ordinary and gang resource requests.
    pub available_resources: ResourceBundle,
    /// Consumed independently by cluster resource constraints, so
    /// constraints and real demand never double-subtract from the same
    /// node (scheduler Phase 5).
    pub available_resources_for_constraints: ResourceBundle,
    pub labels: HashMap<String, String>,
    pub status: NodeStatus,
    pub sched_requests: Vec<CommittedRequest>,
    pub sched_constraints: Vec<CommittedRequest>,
    pub im_instance_id: Option<InstanceId>,
    pub idle_duration_ms: u64,
    pub launch_config_hash: Option<String>,
}

impl SchedulingNode {
    /// Phase 0's RUNNING case: a node backed by a live `NodeState`.
    pub fn from_live(
        im_instance_id: InstanceId,
        node_state: &NodeState,
        launch_config_hash: Option<String>,
    ) -> Self {
        SchedulingNode {
            node_type: node_state.ray_node_type_name.clone(),
            total_resources: node_state.total_resources.clone(),
            available_resources: node_state.available_resources.clone(),
            available_resources_for_constraints: node_state.available_resources.clone(),
            labels: HashMap::new(),
            status: NodeStatus::Running,
            sched_requests: Vec::new(),
            sched_constraints: Vec::new(),
            im_instance_id: Some(im_instance_id),
            idle_duration_ms: node_state.idle_duration_ms,
            launch_config_hash,
        }
    }

    /// Phase 0's PENDING case: an instance still short of RAY_RUNNING,
    /// sized from its node-type's declared capacity since it has no live
    /// observation yet.
    pub fn from_pending_config(im_instance_id: InstanceId, config: &NodeTypeConfig) -> Self {
        SchedulingNode {
            node_type: config.name.clone(),
            total_resources: config.resources.clone(),
            available_resources: config.resources.clone(),
            available_resources_for_constraints: config.resources.clone(),
            labels: config.labels.clone(),
            status: NodeStatus::Pending,
            sched_requests: Vec::new(),
            sched_constraints: Vec::new(),
            im_instance_id: Some(im_instance_id),
            idle_duration_ms: 0,
            launch_config_hash: Some(config.launch_config_hash.clone()),
        }
    }

    /// A fresh candidate the bin-packer may commit to when the existing
    /// pool can't satisfy demand.
    pub fn new_to_launch(config: &NodeTypeConfig) -> Self {
        SchedulingNode {
            node_type: config.name.clone(),
            total_resources: config.resources.clone(),
            available_resources: config.resources.clone(),
            available_resources_for_constraints: config.resources.clone(),
            labels: config.labels.clone(),
            status: NodeStatus::ToLaunch,
            sched_requests: Vec::new(),
            sched_constraints: Vec::new(),
            im_instance_id: None,
            idle_duration_ms: 0,
            launch_config_hash: Some(config.launch_config_hash.clone()),
        }
    }

    pub fn has_gpu_capacity(&self) -> bool {
        self.total_resources.get("GPU").copied().unwrap_or(0.0) > 0.0
    }

    pub fn is_running(&self) -> bool {
        self.status == NodeStatus::Running
    }
}
