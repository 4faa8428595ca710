//! External collaborator contracts: the cloud provider and the ray
//! installer. Both are fire-and-observe — the core never blocks on
//! provider I/O, and outcomes surface later through [`crate::sync::sync_from`].

use autoscaler_types::{CloudInstance, CloudInstanceId, InstanceId, NodeState, NodeTypeName, RequestId};
use std::collections::HashMap;

/// A request to launch `count` VMs of `instance_type`, tagged with `id` so
/// a later [`ProviderError::LaunchNodeError`] can be correlated back to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub instance_type: NodeTypeName,
    pub count: u32,
    pub id: RequestId,
}

/// A request to terminate one VM, addressed by whichever id the caller has.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminateRequest {
    pub instance_id: Option<InstanceId>,
    pub cloud_instance_id: Option<CloudInstanceId>,
    pub id: RequestId,
}

/// An asynchronous failure surfaced by the cloud provider, observed on a
/// later tick rather than returned synchronously from `launch`/`terminate`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    LaunchNodeError {
        request_id: RequestId,
        node_type: NodeTypeName,
        details: String,
    },
    TerminateNodeError {
        cloud_instance_id: CloudInstanceId,
        request_id: RequestId,
        details: String,
    },
}

/// A ray-agent install failure, observed the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct RayInstallError {
    pub im_instance_id: InstanceId,
    pub details: String,
}

/// The cloud provider collaborator. `launch`/`terminate` fire a request and
/// return immediately; their outcome is read back via `non_terminated` and
/// `poll_errors` on a subsequent tick, never through a return value here.
pub trait CloudProviderAdapter: Send + Sync {
    fn launch(&self, request: LaunchRequest);
    fn terminate(&self, request: TerminateRequest);
    fn non_terminated(&self) -> HashMap<CloudInstanceId, CloudInstance>;
    fn poll_errors(&self) -> Vec<ProviderError>;
}

/// The ray-agent installer collaborator. Installation itself happens out of
/// band once a VM is ALLOCATED; this trait only surfaces failures.
pub trait RayInstaller: Send + Sync {
    fn poll_install_errors(&self) -> Vec<RayInstallError>;
}

/// The gossip/heartbeat layer reporting cluster membership — the source of
/// `sync_from`'s `ray_nodes` observation.
pub trait MembershipSource: Send + Sync {
    fn ray_nodes(&self) -> Vec<NodeState>;
}
