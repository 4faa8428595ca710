//! Error types for the instance manager.

use thiserror::Error;

/// Result type alias for instance manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can occur during instance manager operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    /// `expected_version` did not match the manager's current version.
    #[error("version mismatch: expected {expected}, current {current}")]
    VersionMismatch { expected: u64, current: u64 },

    /// An update requested a transition the state machine does not allow.
    #[error("illegal transition for {instance_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        instance_id: String,
        from: crate::state_machine::InstanceStatus,
        to: crate::state_machine::InstanceStatus,
    },

    /// An update referenced an instance id the manager doesn't know about.
    #[error("unknown instance: {0}")]
    UnknownInstance(String),
}
