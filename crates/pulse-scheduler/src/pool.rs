//! Worker pool — availability, cooldown and execution bookkeeping.
//!
//! Workers are kept in registration order so that selection is
//! first-ready-first-assigned.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use pulse_core::WorkerId;

use crate::error::{SchedulerError, SchedulerResult};

/// Per-worker state. A worker is ready only while available and past its
/// cooldown.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub is_available: bool,
    pub cooldown_until: Option<Instant>,
    pub execution_count: u64,
    pub failure_count: u64,
    pub average_execution_time_ms: f64,
    pub last_execution: Option<Instant>,
}

impl WorkerRecord {
    fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            is_available: true,
            cooldown_until: None,
            execution_count: 0,
            failure_count: 0,
            average_execution_time_ms: 0.0,
            last_execution: None,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.is_available && self.cooldown_until.is_none_or(|until| until <= now)
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Fold one execution into the running mean.
    fn record_execution(&mut self, duration: Duration) {
        self.execution_count += 1;
        let ms = duration.as_secs_f64() * 1000.0;
        let n = self.execution_count as f64;
        self.average_execution_time_ms += (ms - self.average_execution_time_ms) / n;
    }
}

/// Exported view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub available: bool,
    pub cooldown_remaining_ms: u64,
    pub execution_count: u64,
    pub failure_count: u64,
    pub average_execution_time_ms: f64,
}

#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: Vec<WorkerRecord>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker_id: WorkerId) -> SchedulerResult<()> {
        if worker_id.trim().is_empty() {
            return Err(SchedulerError::EmptyWorkerId);
        }
        if self.get(&worker_id).is_some() {
            return Err(SchedulerError::DuplicateWorker(worker_id));
        }
        self.workers.push(WorkerRecord::new(worker_id));
        Ok(())
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerRecord> {
        self.workers.iter().find(|w| w.worker_id == worker_id)
    }

    fn get_mut(&mut self, worker_id: &str) -> Option<&mut WorkerRecord> {
        self.workers.iter_mut().find(|w| w.worker_id == worker_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ready workers in registration order.
    pub fn ready(&self, now: Instant) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|w| w.is_ready(now))
            .map(|w| w.worker_id.clone())
            .collect()
    }

    /// Workers currently executing a task.
    pub fn busy_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_available).count()
    }

    /// Mark a worker busy. Returns false if it was not ready.
    pub fn claim(&mut self, worker_id: &str, now: Instant) -> bool {
        match self.get_mut(worker_id) {
            Some(w) if w.is_ready(now) => {
                w.is_available = false;
                w.last_execution = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Release a worker after an execution finished at `finished_at`.
    ///
    /// The worker becomes available again but stays unselectable until
    /// `finished_at + cooldown`.
    pub fn release(
        &mut self,
        worker_id: &str,
        duration: Duration,
        failed: bool,
        finished_at: Instant,
        cooldown: Duration,
    ) -> bool {
        let Some(w) = self.get_mut(worker_id) else {
            return false;
        };
        w.record_execution(duration);
        if failed {
            w.failure_count += 1;
        }
        w.cooldown_until = Some(finished_at + cooldown);
        w.is_available = true;
        true
    }

    pub fn status(&self, now: Instant) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|w| WorkerStatus {
                worker_id: w.worker_id.clone(),
                available: w.is_ready(now),
                cooldown_remaining_ms: w.cooldown_remaining(now).as_millis() as u64,
                execution_count: w.execution_count,
                failure_count: w.failure_count,
                average_execution_time_ms: w.average_execution_time_ms,
            })
            .collect()
    }
}
