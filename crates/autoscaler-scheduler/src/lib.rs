//! autoscaler-scheduler — the Resource-Demand Scheduler.
//!
//! `schedule` is a pure function: given a consistent snapshot of the
//! cluster and outstanding demand, it produces launch/terminate decisions
//! by greedily bin-packing requests onto a hypothetical cluster. It
//! performs no I/O and mutates none of its inputs.

pub mod node;
pub mod packer;
pub mod schedule;
pub mod scorer;
pub mod types;

pub use schedule::{schedule, ScheduleContext};
pub use types::*;
