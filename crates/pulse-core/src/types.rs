//! Domain types shared by the sampler, the throttle gate and the scheduler.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ConfigError;

/// Identifier of a registered worker.
pub type WorkerId = String;

/// Identifier assigned to a task at submission time.
///
/// Ids are handed out from a per-scheduler counter, so a value is never
/// reused for the lifetime of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

// ── Priority ───────────────────────────────────────────────────────

/// Task priority. Variants are declared lowest first, so the derived
/// `Ord` gives `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// All levels, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// High and critical work survives shedding and shortens the pulse.
    pub fn is_urgent(&self) -> bool {
        *self >= Priority::High
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(ConfigError::InvalidPriority(s.to_string())),
        }
    }
}

// ── Resource readings ──────────────────────────────────────────────

/// Point-in-time host resource reading produced by the sampler.
///
/// `taken_at` is monotonic and drives every cooldown comparison;
/// `epoch_ms` is wall-clock time kept for export only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    /// Smoothed CPU utilization (0-100).
    pub cpu_percent: f64,
    /// Memory utilization (0-100).
    pub memory_percent: f64,
    /// 1, 5 and 15 minute load averages.
    pub load_average: [f64; 3],
    #[serde(skip)]
    pub taken_at: Instant,
    pub epoch_ms: u64,
}

impl ResourceSnapshot {
    /// Build a snapshot stamped with the current time.
    pub fn new(cpu_percent: f64, memory_percent: f64, load_average: [f64; 3]) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            load_average,
            taken_at: Instant::now(),
            epoch_ms: epoch_millis(),
        }
    }

    /// The 1-minute load average.
    pub fn load_1m(&self) -> f64 {
        self.load_average[0]
    }
}

/// The resource an alert refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => f.write_str("cpu"),
            ResourceKind::Memory => f.write_str("memory"),
        }
    }
}

/// Severity of a resource alert. `Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// A threshold crossing detected on a sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceAlert {
    pub kind: ResourceKind,
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub epoch_ms: u64,
}

/// Per-tick scheduler metrics published as `metrics:updated`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PulseMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub load_average_1m: f64,
    /// Workers currently executing a task.
    pub active_workers: usize,
    pub queue_depth: usize,
    /// Delay until the next pulse.
    pub interval_ms: u64,
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
