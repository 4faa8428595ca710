//! In-memory collaborator implementations for `simulate` and local
//! exercising. None of this talks to a real cloud, ray cluster, or
//! installer — it fabricates plausible outcomes so the reconcile/schedule
//! loop can be driven end to end without external infrastructure.

use autoscaler_reconciler::{
    CloudProviderAdapter, LaunchRequest, MembershipSource, ProviderError, RayInstallError, RayInstaller,
    TerminateRequest,
};
use autoscaler_types::{CloudInstance, CloudInstanceId, NodeState, NodeTypeConfig, NodeTypeName, RayNodeStatus};
use std::collections::HashMap;
use std::sync::Mutex;

/// Launches and terminates complete instantly and without error; every
/// launched instance immediately becomes a `non_terminated` cloud instance.
#[derive(Default)]
pub struct FakeCloudProvider {
    instances: Mutex<HashMap<CloudInstanceId, CloudInstance>>,
    next_id: Mutex<u64>,
}

impl FakeCloudProvider {
    pub fn new() -> Self {
        FakeCloudProvider::default()
    }

    fn fresh_cloud_id(&self) -> CloudInstanceId {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("fake-cloud-{next}")
    }
}

impl CloudProviderAdapter for FakeCloudProvider {
    fn launch(&self, request: LaunchRequest) {
        let mut instances = self.instances.lock().unwrap();
        for _ in 0..request.count {
            let cloud_id = self.fresh_cloud_id();
            instances.insert(
                cloud_id.clone(),
                CloudInstance {
                    cloud_instance_id: cloud_id,
                    node_type: request.instance_type.clone(),
                    launch_request_id: Some(request.id.clone()),
                },
            );
        }
    }

    fn terminate(&self, request: TerminateRequest) {
        if let Some(cloud_id) = &request.cloud_instance_id {
            self.instances.lock().unwrap().remove(cloud_id);
        }
    }

    fn non_terminated(&self) -> HashMap<CloudInstanceId, CloudInstance> {
        self.instances.lock().unwrap().clone()
    }

    fn poll_errors(&self) -> Vec<ProviderError> {
        Vec::new()
    }
}

/// Installs ray on every allocated VM without ever failing.
#[derive(Default)]
pub struct FakeRayInstaller;

impl RayInstaller for FakeRayInstaller {
    fn poll_install_errors(&self) -> Vec<RayInstallError> {
        Vec::new()
    }
}

/// Reports every cloud instance as a healthy, idle ray node, sized to its
/// node type's declared capacity. Good enough to let a `simulate` run
/// observe instances reaching RAY_RUNNING without a real gossip layer.
pub struct FakeMembershipSource<'a> {
    pub cloud_provider: &'a FakeCloudProvider,
    pub node_type_configs: &'a HashMap<NodeTypeName, NodeTypeConfig>,
}

impl MembershipSource for FakeMembershipSource<'_> {
    fn ray_nodes(&self) -> Vec<NodeState> {
        self.cloud_provider
            .non_terminated()
            .into_values()
            .filter_map(|cloud| {
                let config = self.node_type_configs.get(&cloud.node_type)?;
                Some(NodeState {
                    node_id: format!("node-{}", cloud.cloud_instance_id),
                    cloud_instance_id: Some(cloud.cloud_instance_id),
                    ray_node_type_name: cloud.node_type,
                    total_resources: config.resources.clone(),
                    available_resources: config.resources.clone(),
                    idle_duration_ms: 0,
                    status: RayNodeStatus::Idle,
                })
            })
            .collect()
    }
}
