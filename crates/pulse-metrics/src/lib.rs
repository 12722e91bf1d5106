//! pulse-metrics — host resource sampling for the pulse scheduler.
//!
//! Reads CPU usage, memory and load averages from the host, smooths
//! CPU with a short moving average, keeps a bounded snapshot history and
//! raises edge-triggered warning/critical alerts.
//!
//! # Architecture
//!
//! ```text
//! ResourceSampler
//!   ├── HostProbe (SystemProbe via sysinfo, ScriptedProbe in tests)
//!   ├── sample()  → ResourceSnapshot (history ring + watch channel)
//!   ├── AlertTracker → PulseEvent::ResourceAlert on level changes
//!   └── start()/stop() → periodic sampling task
//! ```
//!
//! Sampling failures never stop the timer: the cycle is logged and
//! skipped.

pub mod alert;
pub mod error;
pub mod probe;
pub mod sampler;

pub use alert::AlertTracker;
pub use error::{SampleError, SampleResult};
pub use probe::{HostProbe, HostReading, ScriptedProbe, SystemProbe};
pub use sampler::{MetricsSummary, ResourceAverages, ResourceSampler};
