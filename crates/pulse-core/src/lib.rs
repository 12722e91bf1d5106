//! pulse-core — shared types for the adaptive pulse scheduler.
//!
//! Everything the sampler, the throttle gate and the scheduler exchange
//! lives here: resource snapshots, task priorities, the configuration
//! surface (TOML-loadable, patchable at runtime) and the broadcast event
//! bus that carries `throttle`, `release`, `tasks:shed`, `task:*` and
//! `metrics:updated` notifications to subscribers.
//!
//! # Layout
//!
//! ```text
//! pulse-core
//!   ├── types   (ResourceSnapshot, Priority, TaskId, alerts, PulseMetrics)
//!   ├── config  (SchedulerConfig, SchedulerConfigPatch, SamplerConfig, PulseConfig)
//!   ├── event   (PulseEvent, EventBus)
//!   └── error   (ConfigError)
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use config::{
    AlertThresholds, PulseConfig, SamplerConfig, SchedulerConfig, SchedulerConfigPatch,
};
pub use error::{ConfigError, ConfigResult};
pub use event::{EventBus, PulseEvent};
pub use types::*;
