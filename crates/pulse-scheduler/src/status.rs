//! Point-in-time scheduler status.

use serde::Serialize;

use pulse_core::ResourceSnapshot;

use crate::pool::WorkerStatus;
use crate::queue::QueueDepth;

/// Lifetime task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounters {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub shed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub throttled: bool,
    pub throttle_count: u64,
    /// Delay until the next pulse, as computed by the last tick.
    pub interval_ms: u64,
    pub queue: QueueDepth,
    pub workers: Vec<WorkerStatus>,
    /// Dispatched tasks whose completion has not been recorded yet.
    pub in_flight: usize,
    pub tasks: TaskCounters,
    pub resources: Option<ResourceSnapshot>,
}

impl SchedulerStatus {
    pub fn available_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.available).count()
    }
}
