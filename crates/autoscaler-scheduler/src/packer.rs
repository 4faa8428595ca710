//! The greedy bin-packer (`try_schedule`): given unscheduled bundle
//! requests and a pool of candidate nodes, repeatedly commits the
//! best-scoring (node, placement) pair until the pool is exhausted or no
//! candidate can place anything.

use crate::node::{CommittedRequest, NodeStatus, SchedulingNode};
use crate::scorer::{better, score_node, Pool};
use crate::types::{ConstraintKind, PlacementConstraint};
use autoscaler_types::{NodeTypeConfig, NodeTypeName, ResourceBundle};
use std::collections::HashMap;
use tracing::debug;

/// One atomic bundle placement still awaiting a node. `origin` indexes
/// back into the caller's original (pre-expansion) request list, purely
/// so callers can reassemble an infeasible-request report; the packer
/// itself never inspects it.
#[derive(Debug, Clone)]
pub struct UnitRequest {
    pub bundle: ResourceBundle,
    pub constraints: Vec<PlacementConstraint>,
    pub origin: usize,
}

fn available_pool<'a>(node: &'a SchedulingNode, pool: Pool) -> &'a ResourceBundle {
    match pool {
        Pool::Real => &node.available_resources,
        Pool::Constraint => &node.available_resources_for_constraints,
    }
}

fn available_pool_mut(node: &mut SchedulingNode, pool: Pool) -> &mut ResourceBundle {
    match pool {
        Pool::Real => &mut node.available_resources,
        Pool::Constraint => &mut node.available_resources_for_constraints,
    }
}

fn dominates(available: &ResourceBundle, bundle: &ResourceBundle) -> bool {
    bundle
        .iter()
        .all(|(res, qty)| available.get(res).copied().unwrap_or(0.0) >= *qty)
}

fn anti_affinity_blocks(node: &SchedulingNode, constraints: &[PlacementConstraint]) -> bool {
    constraints.iter().any(|c| {
        c.kind == ConstraintKind::AntiAffinity
            && node.labels.get(&c.label_name).is_some_and(|v| v == &c.label_value)
    })
}

fn imprint_labels(node: &mut SchedulingNode, constraints: &[PlacementConstraint]) {
    for c in constraints {
        node.labels.entry(c.label_name.clone()).or_insert_with(|| c.label_value.clone());
    }
}

/// Simulate placing as many `requests` as possible, in order, onto a copy
/// of `node`. Returns the resulting node, the requests that didn't fit
/// (order-preserved), and how many were placed.
fn simulate(node: &SchedulingNode, pool: Pool, requests: &[UnitRequest]) -> (SchedulingNode, Vec<UnitRequest>, usize) {
    let mut probe = node.clone();
    let mut remaining = Vec::with_capacity(requests.len());
    let mut placed = 0;
    for req in requests {
        if anti_affinity_blocks(&probe, &req.constraints) {
            remaining.push(req.clone());
            continue;
        }
        let fits = dominates(available_pool(&probe, pool), &req.bundle);
        if !fits {
            remaining.push(req.clone());
            continue;
        }
        for (res, qty) in &req.bundle {
            if let Some(v) = available_pool_mut(&mut probe, pool).get_mut(res) {
                *v -= qty;
            }
        }
        imprint_labels(&mut probe, &req.constraints);
        let committed = CommittedRequest { bundle: req.bundle.clone() };
        match pool {
            Pool::Real => probe.sched_requests.push(committed),
            Pool::Constraint => probe.sched_constraints.push(committed),
        }
        placed += 1;
    }
    (probe, remaining, placed)
}

/// Make sure the spare-candidate pool has one fresh TO_LAUNCH node for
/// every type that still has launch headroom.
fn reseed_spares(
    spares: &mut Vec<SchedulingNode>,
    node_type_configs: &HashMap<NodeTypeName, NodeTypeConfig>,
    available_by_type: &HashMap<NodeTypeName, i64>,
) {
    for (node_type, remaining) in available_by_type {
        if *remaining > 0 && !spares.iter().any(|n| &n.node_type == node_type) {
            if let Some(cfg) = node_type_configs.get(node_type) {
                spares.push(SchedulingNode::new_to_launch(cfg));
            }
        }
    }
}

/// Greedily commit the best-scoring (node, placement) pair until `nodes`
/// is exhausted, no candidate can place anything, or `max_num_nodes` is
/// reached. Newly-launched nodes are appended to `nodes`. Returns the
/// requests that remained unplaced.
#[allow(clippy::too_many_arguments)]
pub fn try_schedule(
    nodes: &mut Vec<SchedulingNode>,
    node_type_configs: &HashMap<NodeTypeName, NodeTypeConfig>,
    available_by_type: &mut HashMap<NodeTypeName, i64>,
    max_num_nodes: Option<u32>,
    current_node_count: &mut u32,
    pool: Pool,
    conserve_gpu_nodes: bool,
    requests: Vec<UnitRequest>,
) -> Vec<UnitRequest> {
    let mut unscheduled = requests;
    let existing_indices: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.status != NodeStatus::ToTerminate)
        .map(|(i, _)| i)
        .collect();
    let mut spares: Vec<SchedulingNode> = Vec::new();

    loop {
        if unscheduled.is_empty() {
            break;
        }
        if let Some(cap) = max_num_nodes {
            if *current_node_count >= cap {
                debug!("bin-packer stopped: max_num_nodes reached");
                break;
            }
        }
        reseed_spares(&mut spares, node_type_configs, available_by_type);

        enum Candidate {
            Existing(usize),
            Spare(usize),
        }

        let mut best: Option<(Candidate, SchedulingNode, Vec<UnitRequest>, crate::scorer::UtilizationScore)> = None;

        for &idx in &existing_indices {
            let (probe, remaining, placed) = simulate(&nodes[idx], pool, &unscheduled);
            if placed == 0 {
                continue;
            }
            let score = score_node(&probe, pool, conserve_gpu_nodes);
            let is_better = best.as_ref().map(|(_, _, _, s)| better(&score, s)).unwrap_or(true);
            if is_better {
                best = Some((Candidate::Existing(idx), probe, remaining, score));
            }
        }
        for (spare_idx, spare) in spares.iter().enumerate() {
            let (probe, remaining, placed) = simulate(spare, pool, &unscheduled);
            if placed == 0 {
                continue;
            }
            let score = score_node(&probe, pool, conserve_gpu_nodes);
            let is_better = best.as_ref().map(|(_, _, _, s)| better(&score, s)).unwrap_or(true);
            if is_better {
                best = Some((Candidate::Spare(spare_idx), probe, remaining, score));
            }
        }

        let Some((candidate, probe, remaining, _)) = best else {
            debug!("bin-packer stopped: no candidate could place any remaining request");
            break;
        };
        unscheduled = remaining;

        match candidate {
            Candidate::Existing(idx) => {
                nodes[idx] = probe;
            }
            Candidate::Spare(spare_idx) => {
                spares.remove(spare_idx);
                let node_type = probe.node_type.clone();
                nodes.push(probe);
                *current_node_count += 1;
                if let Some(n) = available_by_type.get_mut(&node_type) {
                    *n -= 1;
                }
            }
        }
    }

    unscheduled
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscaler_types::NodeTypeConfig;
    use std::collections::HashMap;

    fn config(name: &str, resources: &[(&str, f64)], max_worker_nodes: u32) -> NodeTypeConfig {
        NodeTypeConfig {
            name: name.into(),
            resources: resources.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            labels: HashMap::new(),
            min_worker_nodes: 0,
            max_worker_nodes,
            launch_config_hash: "h1".into(),
        }
    }

    fn unit(bundle: &[(&str, f64)]) -> UnitRequest {
        UnitRequest {
            bundle: bundle.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            constraints: Vec::new(),
            origin: 0,
        }
    }

    #[test]
    fn packs_onto_a_freshly_launched_node_when_pool_is_empty() {
        let cfg = config("t1", &[("CPU", 4.0)], 1);
        let mut node_type_configs = HashMap::new();
        node_type_configs.insert("t1".to_string(), cfg);
        let mut available_by_type = HashMap::new();
        available_by_type.insert("t1".to_string(), 1);
        let mut nodes = Vec::new();
        let mut count = 0;

        let infeasible = try_schedule(
            &mut nodes,
            &node_type_configs,
            &mut available_by_type,
            None,
            &mut count,
            Pool::Real,
            false,
            vec![unit(&[("CPU", 2.0)])],
        );

        assert!(infeasible.is_empty());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].sched_requests.len(), 1);
    }

    #[test]
    fn reports_infeasible_when_no_node_type_can_fit_the_bundle() {
        let cfg = config("t1", &[("CPU", 1.0)], 1);
        let mut node_type_configs = HashMap::new();
        node_type_configs.insert("t1".to_string(), cfg);
        let mut available_by_type = HashMap::new();
        available_by_type.insert("t1".to_string(), 1);
        let mut nodes = Vec::new();
        let mut count = 0;

        let infeasible = try_schedule(
            &mut nodes,
            &node_type_configs,
            &mut available_by_type,
            None,
            &mut count,
            Pool::Real,
            false,
            vec![unit(&[("CPU", 5.0)])],
        );

        assert_eq!(infeasible.len(), 1);
    }

    #[test]
    fn max_num_nodes_cap_stops_launching_new_nodes() {
        let cfg = config("t1", &[("CPU", 1.0)], 5);
        let mut node_type_configs = HashMap::new();
        node_type_configs.insert("t1".to_string(), cfg);
        let mut available_by_type = HashMap::new();
        available_by_type.insert("t1".to_string(), 5);
        let mut nodes = Vec::new();
        let mut count = 1; // already at the cap

        let infeasible = try_schedule(
            &mut nodes,
            &node_type_configs,
            &mut available_by_type,
            Some(1),
            &mut count,
            Pool::Real,
            false,
            vec![unit(&[("CPU", 1.0)])],
        );

        assert_eq!(infeasible.len(), 1);
        assert!(nodes.is_empty());
    }
}
