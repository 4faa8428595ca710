//! The instance state machine: legal statuses and the transition DAG.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A managed instance's lifecycle status.
///
/// Transitions form a DAG (see module docs); an instance never regresses
/// and never leaves a terminal status once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Queued,
    Requested,
    Allocated,
    AllocationFailed,
    RayInstalling,
    RayRunning,
    RayInstallFailed,
    RayStopping,
    RayStopped,
    Terminating,
    Terminated,
    TerminationFailed,
}

impl InstanceStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::AllocationFailed
                | InstanceStatus::Terminated
                | InstanceStatus::TerminationFailed
        )
    }

    /// Direct successors of this status in the DAG.
    ///
    /// A pending instance with no cloud resource bound yet (QUEUED,
    /// REQUESTED) or mid-install (RAY_INSTALLING) can be cancelled straight
    /// to TERMINATED; once it's ALLOCATED or running it has a real VM that
    /// needs the provider's termination path, hence TERMINATING.
    fn direct_successors(self) -> &'static [InstanceStatus] {
        use InstanceStatus::*;
        match self {
            Queued => &[Requested, Terminated],
            Requested => &[Allocated, AllocationFailed, Terminated],
            Allocated => &[RayInstalling, Terminating],
            RayInstalling => &[RayRunning, RayInstallFailed, Terminated],
            RayRunning => &[RayStopping, Terminating],
            RayInstallFailed => &[Terminating],
            RayStopping => &[RayStopped],
            RayStopped => &[Terminating],
            Terminating => &[Terminated, TerminationFailed],
            AllocationFailed | Terminated | TerminationFailed => &[],
        }
    }

    /// All statuses downstream of this one in the DAG, including itself.
    pub fn reachable_statuses(self) -> HashSet<InstanceStatus> {
        let mut seen = HashSet::new();
        let mut stack = vec![self];
        while let Some(s) = stack.pop() {
            if seen.insert(s) {
                stack.extend(s.direct_successors());
            }
        }
        seen
    }

    /// True iff `self` is somewhere on the chain that can still reach RAY_RUNNING,
    /// i.e. QUEUED..RAY_INSTALLING. Used by the scheduler to decide whether an
    /// instance without a live NodeState should still count as a pending node.
    pub fn can_still_reach_ray_running(self) -> bool {
        matches!(
            self,
            InstanceStatus::Queued
                | InstanceStatus::Requested
                | InstanceStatus::Allocated
                | InstanceStatus::RayInstalling
        )
    }
}

/// True iff `from -> to` is a legal direct transition.
pub fn is_legal_transition(from: InstanceStatus, to: InstanceStatus) -> bool {
    from.direct_successors().contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceStatus::*;

    #[test]
    fn queued_can_advance_to_requested_or_cancel_to_terminated() {
        assert!(is_legal_transition(Queued, Requested));
        assert!(is_legal_transition(Queued, Terminated));
        assert!(!is_legal_transition(Queued, Allocated));
        assert!(!is_legal_transition(Queued, Queued));
    }

    #[test]
    fn pending_statuses_without_a_bound_vm_can_cancel_straight_to_terminated() {
        assert!(is_legal_transition(Requested, Terminated));
        assert!(is_legal_transition(RayInstalling, Terminated));
        assert!(!is_legal_transition(Allocated, Terminated));
    }

    #[test]
    fn allocated_and_running_instances_must_go_through_terminating() {
        assert!(is_legal_transition(Allocated, Terminating));
        assert!(is_legal_transition(RayRunning, Terminating));
        assert!(!is_legal_transition(Queued, Terminating));
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for s in [AllocationFailed, Terminated, TerminationFailed] {
            assert!(s.direct_successors().is_empty());
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn reachable_statuses_includes_self_and_downstream() {
        let reachable = RayRunning.reachable_statuses();
        assert!(reachable.contains(&RayRunning));
        assert!(reachable.contains(&RayStopping));
        assert!(reachable.contains(&Terminated));
        assert!(!reachable.contains(&Queued));
        assert!(!reachable.contains(&Allocated));
    }

    #[test]
    fn reachable_statuses_from_queued_covers_whole_dag_except_dead_ends() {
        let reachable = Queued.reachable_statuses();
        assert!(reachable.contains(&RayInstallFailed));
        assert!(reachable.contains(&TerminationFailed));
        assert!(reachable.contains(&AllocationFailed));
    }

    #[test]
    fn can_still_reach_ray_running_excludes_post_running_states() {
        assert!(Allocated.can_still_reach_ray_running());
        assert!(!RayRunning.can_still_reach_ray_running());
        assert!(!Terminating.can_still_reach_ray_running());
    }
}
