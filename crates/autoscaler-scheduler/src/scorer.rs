//! The node utilization score used to rank bin-packer candidates.

use crate::node::SchedulingNode;

/// Which resource pool a scoring/placement pass operates against — real
/// demand or the separate cluster-constraint shadow pool (scheduler
/// Phase 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Real,
    Constraint,
}

/// The lexicographic 4-tuple used to rank bin-packer candidates. Higher is
/// preferred in every component: avoid wasting GPUs first, then pack
/// diverse demand, then fill evenly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationScore {
    pub gpu_ok: bool,
    pub num_matching_resource_types: usize,
    pub min_util: f64,
    pub avg_util: f64,
}

pub fn score_node(node: &SchedulingNode, pool: Pool, conserve_gpu_nodes: bool) -> UtilizationScore {
    let requires_gpu = node
        .sched_requests
        .iter()
        .chain(node.sched_constraints.iter())
        .any(|r| r.bundle.get("GPU").copied().unwrap_or(0.0) > 0.0);
    let gpu_ok = !(node.has_gpu_capacity() && !requires_gpu && conserve_gpu_nodes);

    let num_matching_resource_types = node
        .sched_requests
        .iter()
        .chain(node.sched_constraints.iter())
        .flat_map(|r| r.bundle.keys())
        .filter(|res| node.total_resources.contains_key(res.as_str()))
        .count();

    let available = match pool {
        Pool::Real => &node.available_resources,
        Pool::Constraint => &node.available_resources_for_constraints,
    };
    let utils: Vec<f64> = node
        .total_resources
        .iter()
        .filter(|(_, total)| **total > 0.0)
        .map(|(res, total)| {
            let avail = available.get(res).copied().unwrap_or(0.0);
            (total - avail) / total
        })
        .collect();
    let min_util = utils.iter().cloned().fold(f64::INFINITY, f64::min);
    let min_util = if min_util.is_finite() { min_util } else { 0.0 };
    let avg_util = if utils.is_empty() {
        0.0
    } else {
        utils.iter().sum::<f64>() / utils.len() as f64
    };

    UtilizationScore {
        gpu_ok,
        num_matching_resource_types,
        min_util,
        avg_util,
    }
}

/// True iff `a` ranks strictly above `b`, compared left to right over the
/// tuple's components.
pub fn better(a: &UtilizationScore, b: &UtilizationScore) -> bool {
    use std::cmp::Ordering::*;
    match a.gpu_ok.cmp(&b.gpu_ok) {
        Less => return false,
        Greater => return true,
        Equal => {}
    }
    match a.num_matching_resource_types.cmp(&b.num_matching_resource_types) {
        Less => return false,
        Greater => return true,
        Equal => {}
    }
    match a.min_util.partial_cmp(&b.min_util).unwrap_or(Equal) {
        Less => return false,
        Greater => return true,
        Equal => {}
    }
    matches!(a.avg_util.partial_cmp(&b.avg_util).unwrap_or(Equal), Greater)
}
