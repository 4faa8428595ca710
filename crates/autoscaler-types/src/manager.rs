//! The Instance Manager: an in-memory, optimistically-concurrent,
//! transactional store of [`Instance`]s.
//!
//! Persistence of IM state is an external collaborator's responsibility
//! (see the crate-level docs); this store holds instances only for the
//! lifetime of the process.

use crate::error::{ManagerError, ManagerResult};
use crate::state_machine::is_legal_transition;
use crate::types::{CloudInstanceId, Instance, InstanceId, RequestId, StatusTransition, TimestampNs};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, error, info};

/// A requested transition, as produced by a reconciler pass.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub instance_id: InstanceId,
    pub new_status: crate::state_machine::InstanceStatus,
    pub cloud_instance_id: Option<CloudInstanceId>,
    pub launch_request_id: Option<RequestId>,
    pub details: Option<String>,
}

impl UpdateEvent {
    pub fn new(instance_id: impl Into<InstanceId>, new_status: crate::state_machine::InstanceStatus) -> Self {
        UpdateEvent {
            instance_id: instance_id.into(),
            new_status,
            cloud_instance_id: None,
            launch_request_id: None,
            details: None,
        }
    }

    pub fn with_cloud_instance_id(mut self, id: impl Into<CloudInstanceId>) -> Self {
        self.cloud_instance_id = Some(id.into());
        self
    }

    pub fn with_launch_request_id(mut self, id: impl Into<RequestId>) -> Self {
        self.launch_request_id = Some(id.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<InstanceId, Instance>,
    version: u64,
}

/// Authoritative in-memory store of instances with optimistic-concurrency
/// updates. Safe to share across reconciler passes within a tick; each
/// pass re-reads the version and retries on conflict at the driver level.
#[derive(Debug, Default)]
pub struct InstanceManager {
    state: RwLock<State>,
}

impl InstanceManager {
    pub fn new() -> Self {
        InstanceManager::default()
    }

    /// Insert a freshly-created instance (normally in QUEUED) without going
    /// through the version-checked `update` path. Used by `step_next` when
    /// soliciting new launches.
    pub fn insert(&self, instance: Instance) -> u64 {
        let mut state = self.state.write().expect("instance manager lock poisoned");
        state.instances.insert(instance.instance_id.clone(), instance);
        state.version += 1;
        state.version
    }

    /// A snapshot of all instances and the current version.
    pub fn get_state(&self) -> (Vec<Instance>, u64) {
        let state = self.state.read().expect("instance manager lock poisoned");
        (state.instances.values().cloned().collect(), state.version)
    }

    /// Apply a batch of transition events atomically. Fails the whole batch
    /// with [`ManagerError::VersionMismatch`] if `expected_version` is
    /// stale, or [`ManagerError::IllegalTransition`] / `UnknownInstance` if
    /// any single event is invalid — no partial application.
    pub fn update(
        &self,
        expected_version: u64,
        updates: &[UpdateEvent],
        now_ns: TimestampNs,
    ) -> ManagerResult<u64> {
        let mut state = self.state.write().expect("instance manager lock poisoned");

        if state.version != expected_version {
            debug!(
                expected_version,
                current_version = state.version,
                "instance manager update rejected: version mismatch"
            );
            return Err(ManagerError::VersionMismatch {
                expected: expected_version,
                current: state.version,
            });
        }

        // Validate the whole batch before mutating anything, so a rejected
        // event never leaves a partially-applied batch.
        for event in updates {
            let instance = state
                .instances
                .get(&event.instance_id)
                .ok_or_else(|| ManagerError::UnknownInstance(event.instance_id.clone()))?;
            if instance.status != event.new_status
                && !is_legal_transition(instance.status, event.new_status)
            {
                error!(
                    instance_id = %event.instance_id,
                    from = ?instance.status,
                    to = ?event.new_status,
                    "illegal transition rejected"
                );
                return Err(ManagerError::IllegalTransition {
                    instance_id: event.instance_id.clone(),
                    from: instance.status,
                    to: event.new_status,
                });
            }
        }

        for event in updates {
            let instance = state
                .instances
                .get_mut(&event.instance_id)
                .expect("validated above");
            if instance.status == event.new_status {
                continue;
            }
            info!(
                instance_id = %event.instance_id,
                from = ?instance.status,
                to = ?event.new_status,
                details = event.details.as_deref().unwrap_or(""),
                "instance transition"
            );
            instance.status = event.new_status;
            instance.history.push(StatusTransition {
                status: event.new_status,
                timestamp_ns: now_ns,
            });
            if let Some(cloud_id) = &event.cloud_instance_id {
                instance.cloud_instance_id = Some(cloud_id.clone());
            }
            if let Some(request_id) = &event.launch_request_id {
                instance.launch_request_id = Some(request_id.clone());
            }
        }

        state.version += 1;
        Ok(state.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::InstanceStatus;
    use crate::types::Instance;

    fn manager_with_one_queued() -> (InstanceManager, u64) {
        let mgr = InstanceManager::new();
        let version = mgr.insert(Instance::new("i-1".into(), "t1".into(), 0));
        (mgr, version)
    }

    #[test]
    fn legal_transition_applies_and_bumps_version() {
        let (mgr, version) = manager_with_one_queued();
        let next = mgr
            .update(
                version,
                &[UpdateEvent::new("i-1", InstanceStatus::Requested)],
                10,
            )
            .unwrap();
        assert_eq!(next, version + 1);
        let (instances, v2) = mgr.get_state();
        assert_eq!(v2, next);
        assert_eq!(instances[0].status, InstanceStatus::Requested);
    }

    #[test]
    fn stale_version_is_rejected() {
        let (mgr, version) = manager_with_one_queued();
        let err = mgr
            .update(
                version + 1,
                &[UpdateEvent::new("i-1", InstanceStatus::Requested)],
                10,
            )
            .unwrap_err();
        assert_eq!(
            err,
            ManagerError::VersionMismatch {
                expected: version + 1,
                current: version,
            }
        );
    }

    #[test]
    fn illegal_transition_is_rejected_and_batch_not_applied() {
        let (mgr, version) = manager_with_one_queued();
        let err = mgr
            .update(
                version,
                &[UpdateEvent::new("i-1", InstanceStatus::Allocated)],
                10,
            )
            .unwrap_err();
        assert_eq!(
            err,
            ManagerError::IllegalTransition {
                instance_id: "i-1".into(),
                from: InstanceStatus::Queued,
                to: InstanceStatus::Allocated,
            }
        );
        let (instances, v2) = mgr.get_state();
        assert_eq!(v2, version);
        assert_eq!(instances[0].status, InstanceStatus::Queued);
    }

    #[test]
    fn unknown_instance_is_rejected() {
        let (mgr, version) = manager_with_one_queued();
        let err = mgr
            .update(
                version,
                &[UpdateEvent::new("ghost", InstanceStatus::Requested)],
                10,
            )
            .unwrap_err();
        assert_eq!(err, ManagerError::UnknownInstance("ghost".into()));
    }

    #[test]
    fn batch_is_atomic_one_bad_event_rejects_the_whole_batch() {
        let (mgr, version) = manager_with_one_queued();
        mgr.insert(Instance::new("i-2".into(), "t1".into(), 0));
        let (_, version) = mgr.get_state();
        let err = mgr.update(
            version,
            &[
                UpdateEvent::new("i-1", InstanceStatus::Requested),
                UpdateEvent::new("i-2", InstanceStatus::Allocated),
            ],
            10,
        );
        assert!(err.is_err());
        let (instances, v2) = mgr.get_state();
        assert_eq!(v2, version);
        let i1 = instances.iter().find(|i| i.instance_id == "i-1").unwrap();
        assert_eq!(i1.status, InstanceStatus::Queued);
    }

    #[test]
    fn applying_same_status_again_is_a_noop_within_a_batch() {
        let (mgr, version) = manager_with_one_queued();
        let next = mgr
            .update(version, &[UpdateEvent::new("i-1", InstanceStatus::Queued)], 10)
            .unwrap();
        let (instances, _) = mgr.get_state();
        assert_eq!(instances[0].history.len(), 1);
        assert_eq!(next, version + 1);
    }
}
