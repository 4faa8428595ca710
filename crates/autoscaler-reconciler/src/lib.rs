//! autoscaler-reconciler — folds the outside world into the instance
//! manager (`sync_from`) and drives it forward against scheduling demand
//! (`step_next`).
//!
//! Both halves share the instance manager's own failure modes
//! (`autoscaler_types::ManagerError`); this crate introduces no error
//! type of its own.

pub mod collaborators;
pub mod step;
pub mod sync;

pub use collaborators::{
    CloudProviderAdapter, LaunchRequest, MembershipSource, ProviderError, RayInstallError, RayInstaller,
    TerminateRequest,
};
pub use step::{step_next, ClusterResourceState, StepConfig};
pub use sync::{sync_from, Observations};
