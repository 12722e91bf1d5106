//! Scheduler event stream.
//!
//! Every component publishes onto one [`EventBus`], a thin wrapper over a
//! `tokio::sync::broadcast` channel. Publishing never blocks and never
//! fails: with no subscribers the event is simply dropped, and a slow
//! subscriber observes `RecvError::Lagged` rather than stalling the pulse.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{
    PulseMetrics, ResourceAlert, ResourceSnapshot, TaskId, WorkerId,
};

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events emitted by the sampler, the throttle gate and the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PulseEvent {
    /// A resource crossed a warning or critical threshold.
    ResourceAlert(ResourceAlert),
    /// The gate entered the throttled state.
    Throttle {
        snapshot: ResourceSnapshot,
        cooldown_ms: u64,
    },
    /// The gate returned to clear.
    Release { snapshot: ResourceSnapshot },
    /// Queued low-priority work was dropped while throttled.
    TasksShed { count: usize },
    TaskDispatched {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskCompleted {
        task_id: TaskId,
        worker_id: WorkerId,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: TaskId,
        worker_id: WorkerId,
        duration_ms: u64,
        error: String,
    },
    MetricsUpdated(PulseMetrics),
}

impl PulseEvent {
    /// Wire name of the event kind (`task:completed`, `tasks:shed`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            PulseEvent::ResourceAlert(_) => "resource:alert",
            PulseEvent::Throttle { .. } => "throttle",
            PulseEvent::Release { .. } => "release",
            PulseEvent::TasksShed { .. } => "tasks:shed",
            PulseEvent::TaskDispatched { .. } => "task:dispatched",
            PulseEvent::TaskCompleted { .. } => "task:completed",
            PulseEvent::TaskFailed { .. } => "task:failed",
            PulseEvent::MetricsUpdated(_) => "metrics:updated",
        }
    }
}

/// Cloneable publisher handle shared by all components.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PulseEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current subscriber.
    pub fn emit(&self, event: PulseEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            trace!(kind, "event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PulseEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
