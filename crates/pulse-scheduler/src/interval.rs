//! Adaptive pulse interval.
//!
//! ```text
//! interval = min + (max - min) × scale
//! scale    = 0.5·load + 0.3·queue + 0.2·priority
//!   load     = (cpu + memory) / 200
//!   queue    = min(depth / 10, 1)
//!   priority = 0.5 when high/critical work waits, else 1.0
//! ```
//!
//! Busier hosts and longer queues stretch the interval; urgent work
//! shortens it.

use std::time::Duration;

use pulse_core::{ResourceSnapshot, SchedulerConfig};

pub const LOAD_WEIGHT: f64 = 0.5;
pub const QUEUE_WEIGHT: f64 = 0.3;
pub const PRIORITY_WEIGHT: f64 = 0.2;

/// Queue depth at which the queue term saturates.
pub const QUEUE_SATURATION: f64 = 10.0;

/// Delay before the next pulse.
///
/// Without a snapshot the load term is zero. Non-adaptive configs always
/// pulse at the minimum interval.
pub fn pulse_interval(
    config: &SchedulerConfig,
    snapshot: Option<&ResourceSnapshot>,
    queue_depth: usize,
    urgent_waiting: bool,
) -> Duration {
    let min = config.min_interval();
    if !config.adaptive_scaling {
        return min;
    }

    let load = snapshot
        .map(|s| (s.cpu_percent + s.memory_percent) / 200.0)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let queue = (queue_depth as f64 / QUEUE_SATURATION).min(1.0);
    let priority = if urgent_waiting { 0.5 } else { 1.0 };

    let scale = LOAD_WEIGHT * load + QUEUE_WEIGHT * queue + PRIORITY_WEIGHT * priority;
    let span = config.max_interval().saturating_sub(min);
    min + span.mul_f64(scale.clamp(0.0, 1.0))
}
