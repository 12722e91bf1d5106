//! pulse-scheduler — priority admission control on a resource-aware pulse.
//!
//! Owns a priority task queue and a pool of named workers. On every pulse
//! it consults the throttle gate, sheds low-priority work while throttled
//! and otherwise hands the highest-priority tasks to ready workers.
//!
//! # Architecture
//!
//! ```text
//! PulseScheduler
//!   ├── ResourceSampler (pulse-metrics) ──snapshots──▶ ThrottleGate (pulse-throttle)
//!   ├── TaskQueue   (strict priority, FIFO within a level)
//!   ├── WorkerPool  (registration order, availability + cooldown)
//!   ├── Executor callback, one tokio task per dispatch
//!   │     └── Completion ──mpsc──▶ pulse loop ──▶ WorkerPool::release
//!   └── EventBus (task:*, tasks:shed, metrics:updated)
//! ```
//!
//! The pulse never awaits an execution. A worker becomes selectable again
//! only at `completed_at + cooldown`.

pub mod error;
pub mod interval;
pub mod pool;
pub mod prometheus;
pub mod queue;
pub mod scheduler;
pub mod status;

pub use error::{SchedulerError, SchedulerResult};
pub use interval::pulse_interval;
pub use pool::{WorkerPool, WorkerRecord, WorkerStatus};
pub use prometheus::render_prometheus;
pub use queue::{QueueDepth, Task, TaskQueue};
pub use scheduler::{ExecFuture, Executor, PulseScheduler, TickOutcome, executor_fn};
pub use status::{SchedulerStatus, TaskCounters};
