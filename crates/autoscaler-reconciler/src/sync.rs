//! `sync_from`: the passive half of reconciliation. Folds observations of
//! the outside world — cloud instances, provider errors, ray node status,
//! install errors — into the instance manager, one version-checked batch
//! per pass.
//!
//! Each pass reads a fresh `(instances, version)` snapshot and applies its
//! own batch. A stale version aborts just that pass; the driver retries
//! the whole sync on its next tick, so a single skipped pass here is never
//! observable as lost progress.

use crate::collaborators::{ProviderError, RayInstallError};
use autoscaler_types::{
    is_legal_transition, CloudInstance, CloudInstanceId, Instance, InstanceManager, InstanceStatus,
    NodeState, RequestId, TimestampNs, UpdateEvent,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Everything observed about the outside world since the last tick.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub ray_nodes: Vec<NodeState>,
    pub non_terminated_cloud_instances: HashMap<CloudInstanceId, CloudInstance>,
    pub provider_errors: Vec<ProviderError>,
    pub install_errors: Vec<RayInstallError>,
}

/// Run all four sync passes against `im`, in order.
pub fn sync_from(im: &InstanceManager, observations: &Observations, now_ns: TimestampNs) -> autoscaler_types::ManagerResult<()> {
    run_pass(im, now_ns, "allocation", |instances| allocation_events(instances, observations))?;
    run_pass(im, now_ns, "cloud_termination", |instances| {
        cloud_termination_events(instances, observations)
    })?;
    run_pass(im, now_ns, "ray_status", |instances| ray_status_events(instances, observations))?;
    run_pass(im, now_ns, "install_failure", |instances| {
        install_failure_events(instances, observations)
    })?;
    Ok(())
}

fn run_pass(
    im: &InstanceManager,
    now_ns: TimestampNs,
    name: &str,
    build: impl FnOnce(&[Instance]) -> Vec<UpdateEvent>,
) -> autoscaler_types::ManagerResult<()> {
    let (instances, version) = im.get_state();
    let events = build(&instances);
    if events.is_empty() {
        return Ok(());
    }
    match im.update(version, &events, now_ns) {
        Ok(_) => Ok(()),
        Err(autoscaler_types::ManagerError::VersionMismatch { .. }) => {
            debug!(pass = name, "sync pass aborted on stale version, will retry next tick");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// (a) Allocation pass: bind REQUESTED instances to unassigned cloud
/// instances of a matching type, FIFO by request time, or fail them out if
/// the provider reported a launch error for their request id.
fn allocation_events(instances: &[Instance], obs: &Observations) -> Vec<UpdateEvent> {
    let bound: HashSet<&CloudInstanceId> = instances
        .iter()
        .filter_map(|i| i.cloud_instance_id.as_ref())
        .collect();
    let mut unassigned_by_type: HashMap<&str, Vec<CloudInstanceId>> = HashMap::new();
    for (cloud_id, cloud) in &obs.non_terminated_cloud_instances {
        if !bound.contains(cloud_id) {
            unassigned_by_type
                .entry(cloud.node_type.as_str())
                .or_default()
                .push(cloud_id.clone());
        }
    }

    let mut launch_errors_by_request_id: HashMap<&RequestId, &ProviderError> = HashMap::new();
    for err in &obs.provider_errors {
        if let ProviderError::LaunchNodeError { request_id, .. } = err {
            launch_errors_by_request_id.insert(request_id, err);
        }
    }

    let mut requested: Vec<&Instance> = instances
        .iter()
        .filter(|i| i.status == InstanceStatus::Requested && i.launch_request_id.is_some())
        .collect();
    requested.sort_by_key(|i| i.status_transition_time(InstanceStatus::Requested).unwrap_or(0));

    let mut events = Vec::new();
    for instance in requested {
        if let Some(pool) = unassigned_by_type.get_mut(instance.instance_type.as_str()) {
            if let Some(cloud_id) = pool.pop() {
                events.push(
                    UpdateEvent::new(instance.instance_id.clone(), InstanceStatus::Allocated)
                        .with_cloud_instance_id(cloud_id),
                );
                continue;
            }
        }
        let request_id = instance.launch_request_id.as_ref().expect("filtered above");
        if let Some(ProviderError::LaunchNodeError { node_type, details, .. }) =
            launch_errors_by_request_id.get(request_id)
        {
            if node_type == &instance.instance_type {
                events.push(
                    UpdateEvent::new(instance.instance_id.clone(), InstanceStatus::AllocationFailed)
                        .with_details(details.clone()),
                );
            }
        }
    }
    events
}

/// (b) Cloud-termination pass: an instance whose bound cloud instance has
/// disappeared is TERMINATED; a TERMINATING instance whose terminate
/// request errored is TERMINATION_FAILED.
fn cloud_termination_events(instances: &[Instance], obs: &Observations) -> Vec<UpdateEvent> {
    let mut terminate_errors_by_cloud_id: HashMap<&CloudInstanceId, &ProviderError> = HashMap::new();
    for err in &obs.provider_errors {
        if let ProviderError::TerminateNodeError { cloud_instance_id, .. } = err {
            terminate_errors_by_cloud_id.insert(cloud_instance_id, err);
        }
    }

    let mut events = Vec::new();
    for instance in instances {
        let Some(cloud_id) = &instance.cloud_instance_id else {
            continue;
        };
        if !instance.status.is_terminal() && !obs.non_terminated_cloud_instances.contains_key(cloud_id) {
            if is_legal_transition(instance.status, InstanceStatus::Terminated) {
                events.push(UpdateEvent::new(instance.instance_id.clone(), InstanceStatus::Terminated));
            } else {
                warn!(
                    instance_id = %instance.instance_id,
                    status = ?instance.status,
                    "cloud instance vanished while instance was not in a terminable status"
                );
            }
            continue;
        }
        if instance.status == InstanceStatus::Terminating {
            if let Some(ProviderError::TerminateNodeError { details, .. }) =
                terminate_errors_by_cloud_id.get(cloud_id)
            {
                events.push(
                    UpdateEvent::new(instance.instance_id.clone(), InstanceStatus::TerminationFailed)
                        .with_details(details.clone()),
                );
            }
        }
    }
    events
}

/// Maps an observed ray node status to the instance status it reconciles
/// to. `RayNodeStatus` is a closed enum covering exactly these four cases,
/// so there is no "unrecognized status" branch to handle at runtime.
fn reconciled_status(ray_status: autoscaler_types::RayNodeStatus) -> InstanceStatus {
    use autoscaler_types::RayNodeStatus::*;
    match ray_status {
        Running | Idle => InstanceStatus::RayRunning,
        Draining => InstanceStatus::RayStopping,
        Dead => InstanceStatus::RayStopped,
    }
}

/// (c) Ray-status pass: fold each observed ray node's status into its IM
/// instance, skipping instances that already reached or passed the
/// reconciled status.
fn ray_status_events(instances: &[Instance], obs: &Observations) -> Vec<UpdateEvent> {
    let by_cloud_id: HashMap<&CloudInstanceId, &Instance> = instances
        .iter()
        .filter_map(|i| i.cloud_instance_id.as_ref().map(|c| (c, i)))
        .collect();

    let mut events = Vec::new();
    for node in &obs.ray_nodes {
        let Some(cloud_id) = &node.cloud_instance_id else {
            warn!(node_id = %node.node_id, "ray node observation carries no cloud-instance link");
            continue;
        };
        let Some(instance) = by_cloud_id.get(cloud_id) else {
            continue;
        };
        let reconciled = reconciled_status(node.status);
        if reconciled.reachable_statuses().contains(&instance.status) {
            continue;
        }
        if !is_legal_transition(instance.status, reconciled) {
            warn!(
                instance_id = %instance.instance_id,
                from = ?instance.status,
                to = ?reconciled,
                "ray-status pass skipped an illegal transition"
            );
            continue;
        }
        events.push(UpdateEvent::new(instance.instance_id.clone(), reconciled));
    }
    events
}

/// (d) Install-failure pass: a RAY_INSTALLING instance whose install
/// reported an error moves to RAY_INSTALL_FAILED.
fn install_failure_events(instances: &[Instance], obs: &Observations) -> Vec<UpdateEvent> {
    let mut by_instance_id: HashMap<&str, &RayInstallError> = HashMap::new();
    for err in &obs.install_errors {
        by_instance_id.insert(err.im_instance_id.as_str(), err);
    }

    instances
        .iter()
        .filter(|i| i.status == InstanceStatus::RayInstalling)
        .filter_map(|i| {
            by_instance_id.get(i.instance_id.as_str()).map(|err| {
                UpdateEvent::new(i.instance_id.clone(), InstanceStatus::RayInstallFailed)
                    .with_details(err.details.clone())
            })
        })
        .collect()
}
