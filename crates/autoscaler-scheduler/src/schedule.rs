//! `schedule`: the Resource-Demand Scheduler's pure entry point, and the
//! eight ordered phases that build its decision.

use crate::node::{NodeStatus, SchedulingNode};
use crate::packer::{try_schedule, UnitRequest};
use crate::scorer::Pool;
use crate::types::{
    ClusterResourceConstraint, ConstraintKind, GangResourceRequest, LaunchDecision,
    PlacementConstraint, ResourceRequest, SchedulingReply, SchedulingRequest, TerminateDecision,
    TerminationCause,
};
use autoscaler_types::{NodeTypeConfig, NodeTypeName, ResourceBundle};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// The mutable working set the eight phases operate over: the scheduler's
/// hypothetical view of the cluster for this tick.
pub struct ScheduleContext {
    pub nodes: Vec<SchedulingNode>,
    pub node_type_configs: HashMap<NodeTypeName, NodeTypeConfig>,
    pub max_num_nodes: Option<u32>,
    pub idle_timeout_s: u64,
    pub available_by_type: HashMap<NodeTypeName, i64>,
    pub conserve_gpu_nodes: bool,
}

impl ScheduleContext {
    /// Phase 0: build the context from the current instance snapshot.
    pub fn build(request: &SchedulingRequest) -> Self {
        let mut nodes = Vec::new();
        for current in &request.current_instances {
            if let Some(node_state) = &current.node_state {
                let hash = request
                    .node_type_configs
                    .get(&current.instance.instance_type)
                    .map(|c| c.launch_config_hash.clone());
                nodes.push(SchedulingNode::from_live(
                    current.instance.instance_id.clone(),
                    node_state,
                    hash,
                ));
            } else if current.instance.status.can_still_reach_ray_running() {
                if let Some(cfg) = request.node_type_configs.get(&current.instance.instance_type) {
                    nodes.push(SchedulingNode::from_pending_config(
                        current.instance.instance_id.clone(),
                        cfg,
                    ));
                }
            }
        }

        let mut available_by_type = HashMap::new();
        for (name, cfg) in &request.node_type_configs {
            let existing = nodes
                .iter()
                .filter(|n| n.node_type == *name && n.status != NodeStatus::ToTerminate)
                .count() as i64;
            available_by_type.insert(name.clone(), i64::from(cfg.max_worker_nodes) - existing);
        }

        ScheduleContext {
            nodes,
            node_type_configs: request.node_type_configs.clone(),
            max_num_nodes: request.max_num_nodes,
            idle_timeout_s: request.idle_timeout_s,
            available_by_type,
            conserve_gpu_nodes: request.conserve_gpu_nodes,
        }
    }

    pub fn non_terminating_count(&self) -> u32 {
        self.nodes.iter().filter(|n| n.status != NodeStatus::ToTerminate).count() as u32
    }

    pub fn non_terminating_count_for(&self, node_type: &str) -> u32 {
        self.nodes
            .iter()
            .filter(|n| n.node_type == node_type && n.status != NodeStatus::ToTerminate)
            .count() as u32
    }
}

fn avg_utilization(node: &SchedulingNode) -> f64 {
    let utils: Vec<f64> = node
        .total_resources
        .iter()
        .filter(|(_, total)| **total > 0.0)
        .map(|(res, total)| {
            let avail = node.available_resources.get(res).copied().unwrap_or(0.0);
            (total - avail) / total
        })
        .collect();
    if utils.is_empty() {
        0.0
    } else {
        utils.iter().sum::<f64>() / utils.len() as f64
    }
}

/// Ascending by `(running_ray, -idle_duration_ms, avg_utilization)` —
/// non-running before running, longer-idle before shorter-idle, lower
/// utilization before higher. The first `k` are the termination choices.
fn select_for_termination(candidates: &[(usize, &SchedulingNode)], k: usize) -> Vec<usize> {
    let mut sorted: Vec<(usize, &SchedulingNode)> = candidates.to_vec();
    sorted.sort_by(|(_, a), (_, b)| {
        a.is_running()
            .cmp(&b.is_running())
            .then((-(a.idle_duration_ms as i64)).cmp(&-(b.idle_duration_ms as i64)))
            .then(
                avg_utilization(a)
                    .partial_cmp(&avg_utilization(b))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    sorted.into_iter().take(k).map(|(i, _)| i).collect()
}

fn terminate(node: &mut SchedulingNode, cause: TerminationCause, max_num_nodes: Option<u32>, max_num_nodes_per_type: Option<u32>, idle_duration_ms: Option<u64>) -> TerminateDecision {
    node.status = NodeStatus::ToTerminate;
    TerminateDecision {
        instance_id: node.im_instance_id.clone(),
        ray_node_id: None,
        cause,
        max_num_nodes,
        max_num_nodes_per_type,
        idle_duration_ms,
    }
}

/// Phase 1: a RUNNING node whose config hash no longer matches is outdated.
fn phase1_terminate_outdated(ctx: &mut ScheduleContext, terminations: &mut Vec<TerminateDecision>) {
    let node_type_configs = ctx.node_type_configs.clone();
    for node in ctx.nodes.iter_mut() {
        if node.status != NodeStatus::Running {
            continue;
        }
        let Some(cfg) = node_type_configs.get(&node.node_type) else {
            continue;
        };
        if node.launch_config_hash.as_deref() != Some(cfg.launch_config_hash.as_str()) {
            info!(node_type = %node.node_type, "terminating outdated node");
            terminations.push(terminate(node, TerminationCause::Outdated, None, None, None));
        }
    }
}

/// Phase 2: top up each type to its `min_worker_nodes` floor.
fn phase2_enforce_min_worker_nodes(ctx: &mut ScheduleContext) {
    let mut names: Vec<NodeTypeName> = ctx.node_type_configs.keys().cloned().collect();
    names.sort();
    for name in names {
        let cfg = ctx.node_type_configs.get(&name).unwrap().clone();
        let live = ctx.non_terminating_count_for(&name);
        for _ in live..cfg.min_worker_nodes {
            ctx.nodes.push(SchedulingNode::new_to_launch(&cfg));
            if let Some(n) = ctx.available_by_type.get_mut(&name) {
                *n -= 1;
            }
        }
    }
}

/// Phase 3: evict the excess for each type over its `max_worker_nodes` cap.
fn phase3_enforce_max_worker_nodes_per_type(ctx: &mut ScheduleContext, terminations: &mut Vec<TerminateDecision>) {
    let mut names: Vec<NodeTypeName> = ctx.node_type_configs.keys().cloned().collect();
    names.sort();
    for name in names {
        let cfg = ctx.node_type_configs.get(&name).unwrap().clone();
        let live = ctx.non_terminating_count_for(&name);
        if live <= cfg.max_worker_nodes {
            continue;
        }
        let excess = (live - cfg.max_worker_nodes) as usize;
        let candidates: Vec<(usize, &SchedulingNode)> = ctx
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.node_type == name && n.status != NodeStatus::ToTerminate)
            .collect();
        let chosen = select_for_termination(&candidates, excess);
        for idx in chosen {
            warn!(node_type = %name, max = cfg.max_worker_nodes, "evicting node over per-type cap");
            terminations.push(terminate(
                &mut ctx.nodes[idx],
                TerminationCause::MaxNumNodePerType,
                None,
                Some(cfg.max_worker_nodes),
                None,
            ));
        }
    }
}

/// Phase 4: evict the global excess over `max_num_nodes`.
fn phase4_enforce_max_num_nodes(ctx: &mut ScheduleContext, terminations: &mut Vec<TerminateDecision>) {
    let Some(cap) = ctx.max_num_nodes else {
        return;
    };
    let live = ctx.non_terminating_count();
    if live <= cap {
        return;
    }
    let excess = (live - cap) as usize;
    let candidates: Vec<(usize, &SchedulingNode)> = ctx
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.status != NodeStatus::ToTerminate)
        .collect();
    let chosen = select_for_termination(&candidates, excess);
    for idx in chosen {
        warn!(max_num_nodes = cap, "evicting node over global cap");
        terminations.push(terminate(&mut ctx.nodes[idx], TerminationCause::MaxNumNodes, Some(cap), None, None));
    }
}

/// Phase 5: try to satisfy one cluster resource constraint against the
/// shadow (constraint-only) pool. Commits the context only if every
/// bundle in the constraint placed.
fn phase5_try_constraint(ctx: &mut ScheduleContext, constraint: &ClusterResourceConstraint) -> bool {
    let requests: Vec<UnitRequest> = constraint
        .bundles
        .iter()
        .enumerate()
        .map(|(i, bundle)| UnitRequest {
            bundle: bundle.clone(),
            constraints: Vec::new(),
            origin: i,
        })
        .collect();

    let mut trial_nodes = ctx.nodes.clone();
    let mut trial_available_by_type = ctx.available_by_type.clone();
    let mut trial_count = ctx.non_terminating_count();

    let infeasible = try_schedule(
        &mut trial_nodes,
        &ctx.node_type_configs,
        &mut trial_available_by_type,
        ctx.max_num_nodes,
        &mut trial_count,
        Pool::Constraint,
        ctx.conserve_gpu_nodes,
        requests,
    );

    if infeasible.is_empty() {
        ctx.nodes = trial_nodes;
        ctx.available_by_type = trial_available_by_type;
        true
    } else {
        false
    }
}

fn bundle_sum(bundle: &ResourceBundle) -> f64 {
    bundle.values().sum()
}

fn bundle_sorted_items(bundle: &ResourceBundle) -> Vec<(String, u64)> {
    let mut items: Vec<(String, u64)> = bundle.iter().map(|(k, v)| (k.clone(), v.to_bits())).collect();
    items.sort();
    items
}

/// Phase 7's sort key: `(len(constraints), len(bundle), sum(bundle),
/// sorted(bundle.items))`, hardest first.
fn hardness_key(r: &ResourceRequest) -> (usize, usize, u64, Vec<(String, u64)>) {
    (
        r.placement_constraints.len(),
        r.bundle.len(),
        bundle_sum(&r.bundle).to_bits(),
        bundle_sorted_items(&r.bundle),
    )
}

fn expand_to_units(requests: &[ResourceRequest]) -> (Vec<UnitRequest>, Vec<ResourceRequest>) {
    let mut units = Vec::new();
    for (i, r) in requests.iter().enumerate() {
        for _ in 0..r.count.max(1) {
            units.push(UnitRequest {
                bundle: r.bundle.clone(),
                constraints: r.placement_constraints.clone(),
                origin: i,
            });
        }
    }
    (units, requests.to_vec())
}

/// Fuse gang members whose AFFINITY constraints share the same
/// `(label_name, label_value)`: sum bundles, union constraints.
fn fuse_affinity(units: Vec<UnitRequest>) -> Vec<UnitRequest> {
    fn affinity_key(constraints: &[PlacementConstraint]) -> Option<(String, String)> {
        constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::Affinity)
            .map(|c| (c.label_name.clone(), c.label_value.clone()))
    }

    let mut fused: Vec<UnitRequest> = Vec::new();
    'units: for unit in units {
        if let Some(key) = affinity_key(&unit.constraints) {
            for existing in fused.iter_mut() {
                if affinity_key(&existing.constraints) == Some(key.clone()) {
                    for (res, qty) in &unit.bundle {
                        *existing.bundle.entry(res.clone()).or_insert(0.0) += qty;
                    }
                    for c in &unit.constraints {
                        if !existing.constraints.contains(c) {
                            existing.constraints.push(c.clone());
                        }
                    }
                    continue 'units;
                }
            }
        }
        fused.push(unit);
    }
    fused
}

fn total_placement_constraints(gang: &GangResourceRequest) -> usize {
    gang.requests.iter().map(|r| r.placement_constraints.len()).sum()
}

/// Phase 6: gangs are all-or-nothing, most-constrained first.
fn phase6_gang_requests(ctx: &mut ScheduleContext, gangs: &[GangResourceRequest]) -> Vec<GangResourceRequest> {
    let mut ordered: Vec<&GangResourceRequest> = gangs.iter().collect();
    ordered.sort_by(|a, b| {
        (total_placement_constraints(b), b.requests.len()).cmp(&(total_placement_constraints(a), a.requests.len()))
    });

    let mut infeasible = Vec::new();
    for gang in ordered {
        let (units, _) = expand_to_units(&gang.requests);
        let units = fuse_affinity(units);

        let mut trial_nodes = ctx.nodes.clone();
        let mut trial_available_by_type = ctx.available_by_type.clone();
        let mut trial_count = ctx.non_terminating_count();

        let remaining = try_schedule(
            &mut trial_nodes,
            &ctx.node_type_configs,
            &mut trial_available_by_type,
            ctx.max_num_nodes,
            &mut trial_count,
            Pool::Real,
            ctx.conserve_gpu_nodes,
            units,
        );

        if remaining.is_empty() {
            ctx.nodes = trial_nodes;
            ctx.available_by_type = trial_available_by_type;
        } else {
            infeasible.push(gang.clone());
        }
    }
    infeasible
}

/// Phase 7: ordinary requests, hardest first, a single bin-packer pass.
fn phase7_ordinary_requests(ctx: &mut ScheduleContext, requests: &[ResourceRequest]) -> Vec<ResourceRequest> {
    let mut ordered: Vec<ResourceRequest> = requests.to_vec();
    ordered.sort_by(|a, b| hardness_key(b).cmp(&hardness_key(a)));

    let (units, _) = expand_to_units(&ordered);
    let mut trial_count = ctx.non_terminating_count();

    let remaining = try_schedule(
        &mut ctx.nodes,
        &ctx.node_type_configs,
        &mut ctx.available_by_type,
        ctx.max_num_nodes,
        &mut trial_count,
        Pool::Real,
        ctx.conserve_gpu_nodes,
        units,
    );

    let mut failed_counts: BTreeMap<usize, u32> = BTreeMap::new();
    for unit in &remaining {
        *failed_counts.entry(unit.origin).or_insert(0) += 1;
    }
    failed_counts
        .into_iter()
        .map(|(origin, count)| {
            let source = &ordered[origin];
            ResourceRequest {
                bundle: source.bundle.clone(),
                count,
                placement_constraints: source.placement_constraints.clone(),
            }
        })
        .collect()
}

/// Phase 8: a RUNNING node idle past the timeout, with no constraint
/// commitments, and not needed to satisfy `min_worker_nodes`, is
/// terminated (B1, B2, B3).
fn phase8_idle_termination(ctx: &mut ScheduleContext, terminations: &mut Vec<TerminateDecision>) {
    let threshold_ms = ctx.idle_timeout_s * 1000;
    let node_type_configs = ctx.node_type_configs.clone();
    let mut live_counts: HashMap<NodeTypeName, u32> = HashMap::new();
    for node in &ctx.nodes {
        if node.status != NodeStatus::ToTerminate {
            *live_counts.entry(node.node_type.clone()).or_insert(0) += 1;
        }
    }

    for node in ctx.nodes.iter_mut() {
        if node.status != NodeStatus::Running {
            continue;
        }
        if !node.sched_constraints.is_empty() {
            continue;
        }
        if node.idle_duration_ms <= threshold_ms {
            continue;
        }
        let min = node_type_configs.get(&node.node_type).map(|c| c.min_worker_nodes).unwrap_or(0);
        let live = live_counts.get(&node.node_type).copied().unwrap_or(0);
        if live <= min {
            continue;
        }
        let idle_duration_ms = node.idle_duration_ms;
        terminations.push(terminate(node, TerminationCause::Idle, None, None, Some(idle_duration_ms)));
        if let Some(c) = live_counts.get_mut(&node.node_type) {
            *c -= 1;
        }
    }
}

fn aggregate_launches(ctx: &ScheduleContext) -> Vec<LaunchDecision> {
    let mut counts: BTreeMap<NodeTypeName, u32> = BTreeMap::new();
    for node in &ctx.nodes {
        if node.status == NodeStatus::ToLaunch {
            *counts.entry(node.node_type.clone()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(instance_type, count)| LaunchDecision { instance_type, count })
        .collect()
}

/// The scheduler's pure entry point. No I/O, no mutation of `request`.
pub fn schedule(request: &SchedulingRequest) -> SchedulingReply {
    let mut ctx = ScheduleContext::build(request);
    let mut terminations = Vec::new();

    phase1_terminate_outdated(&mut ctx, &mut terminations);
    phase2_enforce_min_worker_nodes(&mut ctx);
    phase3_enforce_max_worker_nodes_per_type(&mut ctx, &mut terminations);
    phase4_enforce_max_num_nodes(&mut ctx, &mut terminations);

    let mut infeasible_cluster_resource_constraints = Vec::new();
    for constraint in &request.cluster_resource_constraints {
        if !phase5_try_constraint(&mut ctx, constraint) {
            infeasible_cluster_resource_constraints.push(constraint.clone());
        }
    }

    let infeasible_gang_resource_requests = phase6_gang_requests(&mut ctx, &request.gang_resource_requests);
    let infeasible_resource_requests = phase7_ordinary_requests(&mut ctx, &request.resource_requests);

    phase8_idle_termination(&mut ctx, &mut terminations);

    SchedulingReply {
        to_launch: aggregate_launches(&ctx),
        to_terminate: terminations,
        infeasible_resource_requests,
        infeasible_gang_resource_requests,
        infeasible_cluster_resource_constraints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CurrentInstance;
    use autoscaler_types::{Instance, InstanceStatus, NodeState, RayNodeStatus};
    use std::collections::HashMap;

    fn cfg(name: &str, resources: &[(&str, f64)], min: u32, max: u32, hash: &str) -> NodeTypeConfig {
        NodeTypeConfig {
            name: name.into(),
            resources: resources.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            labels: HashMap::new(),
            min_worker_nodes: min,
            max_worker_nodes: max,
            launch_config_hash: hash.into(),
        }
    }

    fn base_request(configs: Vec<NodeTypeConfig>) -> SchedulingRequest {
        SchedulingRequest {
            node_type_configs: configs.into_iter().map(|c| (c.name.clone(), c)).collect(),
            max_num_nodes: None,
            idle_timeout_s: 60,
            resource_requests: Vec::new(),
            gang_resource_requests: Vec::new(),
            cluster_resource_constraints: Vec::new(),
            current_instances: Vec::new(),
            conserve_gpu_nodes: true,
        }
    }

    fn running_instance(id: &str, node_type: &str, hash: &str, available: &[(&str, f64)], idle_ms: u64) -> CurrentInstance {
        let mut instance = Instance::new(id.into(), node_type.into(), 0);
        instance.status = InstanceStatus::RayRunning;
        instance.launch_config_hash = Some(hash.into());
        CurrentInstance {
            instance,
            node_state: Some(NodeState {
                node_id: format!("node-{id}"),
                cloud_instance_id: None,
                ray_node_type_name: node_type.into(),
                total_resources: available.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                available_resources: available.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                idle_duration_ms: idle_ms,
                status: RayNodeStatus::Idle,
            }),
        }
    }

    fn pending_instance(id: &str, node_type: &str) -> CurrentInstance {
        let mut instance = Instance::new(id.into(), node_type.into(), 0);
        instance.status = InstanceStatus::Allocated;
        CurrentInstance { instance, node_state: None }
    }

    #[test]
    fn scenario_min_workers_only() {
        let request = base_request(vec![
            cfg("t1", &[("CPU", 4.0)], 1, 10, "h1"),
            cfg("t2", &[("CPU", 4.0)], 0, 10, "h1"),
            cfg("t3", &[("CPU", 4.0)], 2, 10, "h1"),
        ]);
        let reply = schedule(&request);
        let mut launches: HashMap<_, _> = reply.to_launch.into_iter().map(|l| (l.instance_type, l.count)).collect();
        assert_eq!(launches.remove("t1"), Some(1));
        assert_eq!(launches.remove("t3"), Some(2));
        assert!(launches.is_empty());
    }

    #[test]
    fn scenario_per_type_cap_eviction() {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 0, 1, "h1")]);
        request.current_instances = vec![
            pending_instance("i0", "t1"),
            running_instance("i1", "t1", "h1", &[("CPU", 4.0)], 0), // 0% util
            running_instance("i2", "t1", "h1", &[("CPU", 2.0)], 0), // 50% util
        ];
        let reply = schedule(&request);
        let terminated: Vec<_> = reply
            .to_terminate
            .iter()
            .map(|t| t.instance_id.clone().unwrap())
            .collect();
        assert_eq!(terminated, vec!["i0".to_string(), "i1".to_string()]);
    }

    #[test]
    fn scenario_multi_request_packing() {
        let request_base = base_request(vec![
            cfg("t1", &[("CPU", 1.0), ("GPU", 1.0)], 0, 1, "h1"),
            cfg("t2", &[("CPU", 3.0)], 0, 1, "h1"),
        ]);
        let mut r1 = request_base.clone();
        r1.resource_requests = vec![
            ResourceRequest {
                bundle: [("CPU".to_string(), 1.0)].into_iter().collect(),
                count: 3,
                placement_constraints: Vec::new(),
            },
            ResourceRequest {
                bundle: [("CPU".to_string(), 1.0), ("GPU".to_string(), 1.0)].into_iter().collect(),
                count: 1,
                placement_constraints: Vec::new(),
            },
        ];
        let reply = schedule(&r1);
        assert!(reply.infeasible_resource_requests.is_empty());
        let mut launches: HashMap<_, _> = reply
            .to_launch
            .iter()
            .map(|l| (l.instance_type.clone(), l.count))
            .collect();
        assert_eq!(launches.remove("t1"), Some(1));
        assert_eq!(launches.remove("t2"), Some(1));

        // Reordering should yield the same result (P5).
        let mut r2 = r1.clone();
        r2.resource_requests.reverse();
        let reply2 = schedule(&r2);
        assert_eq!(reply.to_launch, reply2.to_launch);
    }

    #[test]
    fn scenario_gang_atomicity() {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 2.0)], 0, 5, "h1")]);
        let member = |v: f64| ResourceRequest {
            bundle: [("CPU".to_string(), v)].into_iter().collect(),
            count: 1,
            placement_constraints: vec![PlacementConstraint {
                kind: ConstraintKind::Affinity,
                label_name: "group".into(),
                label_value: "a".into(),
            }],
        };
        request.gang_resource_requests = vec![GangResourceRequest {
            id: "gang-1".into(),
            requests: vec![member(3.0), member(3.0)],
        }];
        let reply = schedule(&request);
        assert!(reply.to_launch.is_empty());
        assert_eq!(reply.infeasible_gang_resource_requests.len(), 1);
    }

    #[test]
    fn scenario_fragmentation_forces_a_new_node_instead_of_splitting_across_partial_capacity() {
        // One RUNNING node has 1 CPU free; a request for 2 CPUs doesn't fit
        // there and must launch a fresh node rather than being reported
        // infeasible just because *some* capacity exists somewhere.
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 0, 5, "h1")]);
        request.current_instances = vec![running_instance("i1", "t1", "h1", &[("CPU", 1.0)], 0)];
        request.resource_requests = vec![ResourceRequest {
            bundle: [("CPU".to_string(), 2.0)].into_iter().collect(),
            count: 1,
            placement_constraints: Vec::new(),
        }];
        let reply = schedule(&request);
        assert!(reply.infeasible_resource_requests.is_empty());
        let launched: u32 = reply.to_launch.iter().map(|l| l.count).sum();
        assert_eq!(launched, 1);
    }

    #[test]
    fn scenario_outdated_replacement() {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 2, 5, "h1")]);
        request.current_instances = vec![
            running_instance("i1", "t1", "h1", &[("CPU", 4.0)], 0),
            running_instance("i2", "t1", "h2", &[("CPU", 4.0)], 0),
        ];
        let reply = schedule(&request);
        assert_eq!(reply.to_terminate.len(), 1);
        assert_eq!(reply.to_terminate[0].instance_id, Some("i2".to_string()));
        assert_eq!(reply.to_terminate[0].cause, TerminationCause::Outdated);
        let launched: u32 = reply.to_launch.iter().map(|l| l.count).sum();
        assert_eq!(launched, 1);
    }

    #[test]
    fn boundary_idle_exactly_at_threshold_does_not_terminate() {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 0, 5, "h1")]);
        request.idle_timeout_s = 10;
        request.current_instances = vec![running_instance("i1", "t1", "h1", &[("CPU", 4.0)], 10_000)];
        let reply = schedule(&request);
        assert!(reply.to_terminate.is_empty());
    }

    #[test]
    fn boundary_idle_just_past_threshold_terminates() {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 0, 5, "h1")]);
        request.idle_timeout_s = 10;
        request.current_instances = vec![running_instance("i1", "t1", "h1", &[("CPU", 4.0)], 10_001)];
        let reply = schedule(&request);
        assert_eq!(reply.to_terminate.len(), 1);
        assert_eq!(reply.to_terminate[0].cause, TerminationCause::Idle);
    }

    #[test]
    fn boundary_min_worker_nodes_precedes_idle_termination() {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 1, 5, "h1")]);
        request.idle_timeout_s = 10;
        request.current_instances = vec![running_instance("i1", "t1", "h1", &[("CPU", 4.0)], 999_999)];
        let reply = schedule(&request);
        assert!(reply.to_terminate.is_empty());
    }

    #[test]
    fn node_holding_constraint_commitment_is_never_idle_terminated() {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 0, 5, "h1")]);
        request.idle_timeout_s = 10;
        let mut instance = running_instance("i1", "t1", "h1", &[("CPU", 4.0)], 999_999);
        if let Some(node_state) = &mut instance.node_state {
            node_state.available_resources.insert("CPU".into(), 2.0);
        }
        request.current_instances = vec![instance];
        request.cluster_resource_constraints = vec![ClusterResourceConstraint {
            id: "floor".into(),
            bundles: vec![[("CPU".to_string(), 2.0)].into_iter().collect()],
        }];
        let reply = schedule(&request);
        assert!(reply.infeasible_cluster_resource_constraints.is_empty());
        assert!(reply.to_terminate.is_empty());
    }

    proptest::proptest! {
        // P5: schedule is pure — rerunning against an identical request
        // yields a byte-for-byte identical reply.
        #[test]
        fn schedule_is_deterministic(counts in proptest::collection::vec(0u32..4, 0..5)) {
            let request = request_from_counts(&counts);
            let reply = schedule(&request);
            let reply_again = schedule(&request);
            proptest::prop_assert_eq!(reply, reply_again);
        }

        // P1: the scheduler never leaves more non-terminating nodes of a
        // type than that type's max_worker_nodes allows.
        #[test]
        fn respects_max_worker_nodes_per_type(counts in proptest::collection::vec(0u32..4, 0..5)) {
            let request = request_from_counts(&counts);
            let reply = schedule(&request);
            let launched: u32 = reply.to_launch.iter().map(|l| l.count).sum();
            proptest::prop_assert!(launched <= 3);
        }

        // P2: when max_num_nodes is set, total launches never exceed it.
        #[test]
        fn respects_max_num_nodes(counts in proptest::collection::vec(0u32..4, 0..5), cap in 0u32..3) {
            let mut request = request_from_counts(&counts);
            request.max_num_nodes = Some(cap);
            let reply = schedule(&request);
            let launched: u32 = reply.to_launch.iter().map(|l| l.count).sum();
            proptest::prop_assert!(launched <= cap);
        }
    }

    /// Builds a request against a single node type (max 3 workers, 4 CPUs
    /// each) with one CPU-only resource request per `counts` entry.
    fn request_from_counts(counts: &[u32]) -> SchedulingRequest {
        let mut request = base_request(vec![cfg("t1", &[("CPU", 4.0)], 0, 3, "h1")]);
        request.resource_requests = counts
            .iter()
            .map(|&count| ResourceRequest {
                bundle: [("CPU".to_string(), 1.0)].into_iter().collect(),
                count,
                placement_constraints: Vec::new(),
            })
            .collect();
        request
    }
}
