//! Wire types for the scheduler's pure entry point: the request it
//! consumes and the reply it produces.

use autoscaler_types::{Instance, InstanceId, NodeState, NodeTypeConfig, NodeTypeName, ResourceBundle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// AFFINITY co-locates bundles sharing a label; ANTI_AFFINITY excludes a
/// node already carrying the label from receiving the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    Affinity,
    AntiAffinity,
}

/// A per-bundle placement directive over a `(label_name, label_value)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    pub kind: ConstraintKind,
    pub label_name: String,
    pub label_value: String,
}

/// A flat bundle requirement with a count: `count` separate instances of
/// `bundle`, each placed independently (not gang-atomic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub bundle: ResourceBundle,
    pub count: u32,
    pub placement_constraints: Vec<PlacementConstraint>,
}

/// A set of bundles that must all be placed, or none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GangResourceRequest {
    pub id: String,
    pub requests: Vec<ResourceRequest>,
}

/// A cluster-wide minimum capacity floor, independent of pending demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResourceConstraint {
    pub id: String,
    pub bundles: Vec<ResourceBundle>,
}

/// Why the scheduler chose to terminate a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationCause {
    MaxNumNodes,
    MaxNumNodePerType,
    Idle,
    Outdated,
}

/// `count` new nodes of `instance_type` should be launched. Carries no
/// request id or timestamp — `schedule` is a pure function and assigning
/// those is the reconciler's job when it turns this into IM instances
/// (see `autoscaler-reconciler::step`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchDecision {
    pub instance_type: NodeTypeName,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminateDecision {
    pub instance_id: Option<InstanceId>,
    pub ray_node_id: Option<String>,
    pub cause: TerminationCause,
    pub max_num_nodes: Option<u32>,
    pub max_num_nodes_per_type: Option<u32>,
    pub idle_duration_ms: Option<u64>,
}

/// One entry of the current cluster, pairing an IM instance with its live
/// observed node state (absent until the node reaches RAY_RUNNING).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentInstance {
    pub instance: Instance,
    pub node_state: Option<NodeState>,
}

/// A consistent snapshot of the cluster plus outstanding demand, the
/// scheduler's sole input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingRequest {
    pub node_type_configs: HashMap<NodeTypeName, NodeTypeConfig>,
    pub max_num_nodes: Option<u32>,
    pub idle_timeout_s: u64,
    pub resource_requests: Vec<ResourceRequest>,
    pub gang_resource_requests: Vec<GangResourceRequest>,
    pub cluster_resource_constraints: Vec<ClusterResourceConstraint>,
    pub current_instances: Vec<CurrentInstance>,
    /// Whether to avoid placing GPU-free work on GPU-capable nodes.
    pub conserve_gpu_nodes: bool,
}

/// The scheduler's output: launch/terminate decisions plus everything it
/// could not satisfy, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingReply {
    pub to_launch: Vec<LaunchDecision>,
    pub to_terminate: Vec<TerminateDecision>,
    pub infeasible_resource_requests: Vec<ResourceRequest>,
    pub infeasible_gang_resource_requests: Vec<GangResourceRequest>,
    pub infeasible_cluster_resource_constraints: Vec<ClusterResourceConstraint>,
}
