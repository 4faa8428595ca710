//! autoscaler-types — instance domain model, state machine, and the
//! Instance Manager.
//!
//! The Instance Manager is the sole source of truth for instance lifecycle
//! state. It holds no opinion about scheduling or external I/O; those live
//! in `autoscaler-scheduler` and `autoscaler-reconciler` respectively.

pub mod error;
pub mod manager;
pub mod state_machine;
pub mod types;

pub use error::{ManagerError, ManagerResult};
pub use manager::{InstanceManager, UpdateEvent};
pub use state_machine::{is_legal_transition, InstanceStatus};
pub use types::*;
