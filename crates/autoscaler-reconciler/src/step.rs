//! `step_next`: the active half of reconciliation. Calls the scheduler
//! against the current instance snapshot plus outstanding demand, then
//! issues the resulting launch/terminate decisions to the cloud provider
//! and folds them into the instance manager.
//!
//! The scheduler itself is pure and knows nothing of request ids or
//! timestamps; assigning those, and deciding when a REQUESTED or
//! TERMINATING instance has been waiting too long, is this module's job.

use crate::collaborators::{CloudProviderAdapter, LaunchRequest, TerminateRequest};
use autoscaler_scheduler::{
    ClusterResourceConstraint, CurrentInstance, GangResourceRequest, LaunchDecision, ResourceRequest,
    SchedulingReply, SchedulingRequest, TerminateDecision,
};
use autoscaler_types::{
    is_legal_transition, CloudInstanceId, Instance, InstanceManager, InstanceStatus, ManagerResult,
    NodeState, NodeTypeConfig, NodeTypeName, TimestampNs, UpdateEvent,
};
use std::collections::HashMap;
use tracing::warn;

/// Outstanding demand for this tick, plus the live node states to pair
/// with IM instances when building the scheduler's view of the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterResourceState {
    pub resource_requests: Vec<ResourceRequest>,
    pub gang_resource_requests: Vec<GangResourceRequest>,
    pub cluster_resource_constraints: Vec<ClusterResourceConstraint>,
    pub live_nodes_by_cloud_instance_id: HashMap<CloudInstanceId, NodeState>,
}

/// Static, slow-changing cluster configuration a driver passes to every
/// `step_next` call.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub node_type_configs: HashMap<NodeTypeName, NodeTypeConfig>,
    pub max_num_nodes: Option<u32>,
    pub idle_timeout_s: u64,
    pub conserve_gpu_nodes: bool,
    pub requested_timeout_ns: TimestampNs,
    pub terminating_timeout_ns: TimestampNs,
}

fn build_current_instances(instances: &[Instance], demand: &ClusterResourceState) -> Vec<CurrentInstance> {
    instances
        .iter()
        .map(|instance| {
            let node_state = instance
                .cloud_instance_id
                .as_ref()
                .and_then(|id| demand.live_nodes_by_cloud_instance_id.get(id))
                .cloned();
            CurrentInstance {
                instance: instance.clone(),
                node_state,
            }
        })
        .collect()
}

/// REQUESTED instances stuck past `requested_timeout_ns` are failed out.
/// TERMINATING instances stuck past `terminating_timeout_ns` are marked
/// TERMINATION_FAILED; the provider call is retried on a later tick by
/// [`retry_failed_terminations`] rather than by re-entering TERMINATING,
/// since the DAG has no edge back out of a terminal status.
fn handle_timeouts(im: &InstanceManager, config: &StepConfig, now_ns: TimestampNs) -> ManagerResult<()> {
    let (instances, version) = im.get_state();
    let mut events = Vec::new();
    for instance in &instances {
        match instance.status {
            InstanceStatus::Requested => {
                if let Some(t) = instance.status_transition_time(InstanceStatus::Requested) {
                    if now_ns.saturating_sub(t) > config.requested_timeout_ns {
                        events.push(
                            UpdateEvent::new(instance.instance_id.clone(), InstanceStatus::AllocationFailed)
                                .with_details("timed out waiting for cloud allocation"),
                        );
                    }
                }
            }
            InstanceStatus::Terminating => {
                if let Some(t) = instance.status_transition_time(InstanceStatus::Terminating) {
                    if now_ns.saturating_sub(t) > config.terminating_timeout_ns {
                        events.push(
                            UpdateEvent::new(instance.instance_id.clone(), InstanceStatus::TerminationFailed)
                                .with_details("timed out waiting for termination confirmation"),
                        );
                    }
                }
            }
            _ => {}
        }
    }
    if events.is_empty() {
        return Ok(());
    }
    match im.update(version, &events, now_ns) {
        Ok(_) => Ok(()),
        Err(autoscaler_types::ManagerError::VersionMismatch { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Re-issue a terminate request for every instance stuck in
/// TERMINATION_FAILED. The status itself never moves (no DAG edge leaves
/// it); this only retries the side effect.
fn retry_failed_terminations(im: &InstanceManager, provider: &dyn CloudProviderAdapter, now_ns: TimestampNs) {
    let (instances, _) = im.get_state();
    for (i, instance) in instances
        .iter()
        .filter(|i| i.status == InstanceStatus::TerminationFailed)
        .enumerate()
    {
        provider.terminate(TerminateRequest {
            instance_id: Some(instance.instance_id.clone()),
            cloud_instance_id: instance.cloud_instance_id.clone(),
            id: format!("terminate-retry-{now_ns}-{i}"),
        });
    }
}

/// A RAY_INSTALL_FAILED instance already has a real VM bound to it, unlike
/// an ALLOCATION_FAILED one — it must be queued for teardown rather than
/// left to linger. Never part of the scheduler's pool
/// (`can_still_reach_ray_running` excludes it), so nothing else would ever
/// terminate it.
fn queue_failed_installs_for_teardown(
    im: &InstanceManager,
    provider: &dyn CloudProviderAdapter,
    now_ns: TimestampNs,
) -> ManagerResult<()> {
    let (instances, version) = im.get_state();
    let failed: Vec<&Instance> = instances
        .iter()
        .filter(|i| i.status == InstanceStatus::RayInstallFailed)
        .collect();
    if failed.is_empty() {
        return Ok(());
    }

    let events: Vec<UpdateEvent> = failed
        .iter()
        .map(|i| UpdateEvent::new(i.instance_id.clone(), InstanceStatus::Terminating))
        .collect();
    match im.update(version, &events, now_ns) {
        Ok(_) => {
            for (i, instance) in failed.iter().enumerate() {
                provider.terminate(TerminateRequest {
                    instance_id: Some(instance.instance_id.clone()),
                    cloud_instance_id: instance.cloud_instance_id.clone(),
                    id: format!("terminate-failed-install-{now_ns}-{i}"),
                });
            }
            Ok(())
        }
        Err(autoscaler_types::ManagerError::VersionMismatch { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Advance every ALLOCATED instance to RAY_INSTALLING. Installation itself
/// runs out of band once a VM is ALLOCATED; this is what actually kicks
/// that off and lets a later `RayInstaller::poll_install_errors`/ray-status
/// observation mean something for the instance.
fn install_ray_on_allocated(im: &InstanceManager, now_ns: TimestampNs) -> ManagerResult<()> {
    let (instances, version) = im.get_state();
    let events: Vec<UpdateEvent> = instances
        .iter()
        .filter(|i| i.status == InstanceStatus::Allocated)
        .map(|i| UpdateEvent::new(i.instance_id.clone(), InstanceStatus::RayInstalling))
        .collect();
    if events.is_empty() {
        return Ok(());
    }
    match im.update(version, &events, now_ns) {
        Ok(_) => Ok(()),
        Err(autoscaler_types::ManagerError::VersionMismatch { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

fn apply_launches(
    im: &InstanceManager,
    provider: &dyn CloudProviderAdapter,
    launches: &[LaunchDecision],
    now_ns: TimestampNs,
) -> ManagerResult<()> {
    for (i, launch) in launches.iter().enumerate() {
        let request_id = format!("launch-{now_ns}-{}-{i}", launch.instance_type);
        let mut new_ids = Vec::with_capacity(launch.count as usize);
        for n in 0..launch.count {
            let instance_id = format!("inst-{now_ns}-{}-{i}-{n}", launch.instance_type);
            im.insert(Instance::new(instance_id.clone(), launch.instance_type.clone(), now_ns));
            new_ids.push(instance_id);
        }

        provider.launch(LaunchRequest {
            instance_type: launch.instance_type.clone(),
            count: launch.count,
            id: request_id.clone(),
        });

        let (_, version) = im.get_state();
        let events: Vec<UpdateEvent> = new_ids
            .into_iter()
            .map(|id| UpdateEvent::new(id, InstanceStatus::Requested).with_launch_request_id(request_id.clone()))
            .collect();
        im.update(version, &events, now_ns)?;
    }
    Ok(())
}

/// Instances with a bound VM (ALLOCATED and beyond) go through TERMINATING
/// so the provider's termination path runs; instances with no cloud
/// resource bound yet, or still mid-install, can be cancelled straight to
/// TERMINATED.
fn termination_target(status: InstanceStatus) -> Option<InstanceStatus> {
    if is_legal_transition(status, InstanceStatus::Terminating) {
        Some(InstanceStatus::Terminating)
    } else if is_legal_transition(status, InstanceStatus::Terminated) {
        Some(InstanceStatus::Terminated)
    } else {
        None
    }
}

fn apply_terminations(
    im: &InstanceManager,
    provider: &dyn CloudProviderAdapter,
    terminations: &[TerminateDecision],
    now_ns: TimestampNs,
) -> ManagerResult<()> {
    for term in terminations {
        let Some(instance_id) = &term.instance_id else {
            continue;
        };
        let (instances, version) = im.get_state();
        let Some(instance) = instances.iter().find(|i| &i.instance_id == instance_id) else {
            continue;
        };
        if instance.status.is_terminal() || instance.status == InstanceStatus::Terminating {
            continue;
        }
        let Some(target) = termination_target(instance.status) else {
            warn!(
                instance_id = %instance_id,
                status = ?instance.status,
                cause = ?term.cause,
                "scheduler asked to terminate an instance in an unterminable status, skipping"
            );
            continue;
        };

        im.update(version, &[UpdateEvent::new(instance_id.clone(), target)], now_ns)?;
        provider.terminate(TerminateRequest {
            instance_id: Some(instance_id.clone()),
            cloud_instance_id: instance.cloud_instance_id.clone(),
            id: format!("terminate-{now_ns}-{instance_id}"),
        });
    }
    Ok(())
}

/// One reconciliation tick's active half: schedule, then carry out the
/// decisions against the instance manager and the cloud provider, then
/// advance any ALLOCATED survivors into ray installation.
pub fn step_next(
    im: &InstanceManager,
    provider: &dyn CloudProviderAdapter,
    config: &StepConfig,
    demand: &ClusterResourceState,
    now_ns: TimestampNs,
) -> ManagerResult<SchedulingReply> {
    handle_timeouts(im, config, now_ns)?;
    retry_failed_terminations(im, provider, now_ns);
    queue_failed_installs_for_teardown(im, provider, now_ns)?;

    let (instances, _version) = im.get_state();
    let request = SchedulingRequest {
        node_type_configs: config.node_type_configs.clone(),
        max_num_nodes: config.max_num_nodes,
        idle_timeout_s: config.idle_timeout_s,
        resource_requests: demand.resource_requests.clone(),
        gang_resource_requests: demand.gang_resource_requests.clone(),
        cluster_resource_constraints: demand.cluster_resource_constraints.clone(),
        current_instances: build_current_instances(&instances, demand),
        conserve_gpu_nodes: config.conserve_gpu_nodes,
    };

    let reply = autoscaler_scheduler::schedule(&request);

    apply_launches(im, provider, &reply.to_launch, now_ns)?;
    apply_terminations(im, provider, &reply.to_terminate, now_ns)?;
    install_ray_on_allocated(im, now_ns)?;

    Ok(reply)
}
