//! pulse.toml configuration.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! stock behaviour. Values are validated before they are ever handed to a
//! running component.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Top-level configuration file layout.
///
/// ```toml
/// [scheduler]
/// cooldown_ms = 5000
/// max_cpu_percent = 70.0
///
/// [sampler]
/// interval_ms = 1000
///
/// [sampler.cpu]
/// warning = 70.0
/// critical = 85.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub scheduler: SchedulerConfig,
    pub sampler: SamplerConfig,
}

impl PulseConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: PulseConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.scheduler.validate()?;
        self.sampler.validate()
    }
}

// ── Scheduler ──────────────────────────────────────────────────────

/// Tunable parameters of the pulse loop and the throttle gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Shortest delay between two pulses.
    pub min_pulse_interval_ms: u64,
    /// Longest delay between two pulses.
    pub max_pulse_interval_ms: u64,
    /// Worker cooldown after a completion, and minimum throttle duration.
    pub cooldown_ms: u64,
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    /// Headroom above the limit a single sample must exceed to throttle.
    pub burst_allowance_percent: f64,
    /// Stretch the pulse with load and use burst-tolerant throttling.
    pub adaptive_scaling: bool,
    /// Per-tick dispatch cap. `None` means the worker pool size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_dispatches_per_tick: Option<usize>,
    /// Snapshots averaged when deciding whether pressure is sustained.
    pub sustain_window: usize,
    /// Consecutive comfortable snapshots required to release a throttle.
    pub release_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_pulse_interval_ms: 1000,
            max_pulse_interval_ms: 3000,
            cooldown_ms: 5000,
            max_cpu_percent: 70.0,
            max_memory_percent: 80.0,
            burst_allowance_percent: 10.0,
            adaptive_scaling: true,
            max_concurrent_dispatches_per_tick: None,
            sustain_window: 2,
            release_window: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_pulse_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_pulse_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Check every field; the first violation is returned.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_pulse_interval_ms == 0 {
            return Err(ConfigError::out_of_range(
                "min_pulse_interval_ms",
                self.min_pulse_interval_ms,
                "must be > 0",
            ));
        }
        if self.max_pulse_interval_ms < self.min_pulse_interval_ms {
            return Err(ConfigError::out_of_range(
                "max_pulse_interval_ms",
                self.max_pulse_interval_ms,
                "must be >= min_pulse_interval_ms",
            ));
        }
        check_percent("max_cpu_percent", self.max_cpu_percent)?;
        check_percent("max_memory_percent", self.max_memory_percent)?;
        if !self.burst_allowance_percent.is_finite()
            || !(0.0..=100.0).contains(&self.burst_allowance_percent)
        {
            return Err(ConfigError::out_of_range(
                "burst_allowance_percent",
                self.burst_allowance_percent,
                "must be within 0-100",
            ));
        }
        if self.max_concurrent_dispatches_per_tick == Some(0) {
            return Err(ConfigError::out_of_range(
                "max_concurrent_dispatches_per_tick",
                0,
                "must be >= 1 when set",
            ));
        }
        if self.sustain_window == 0 {
            return Err(ConfigError::out_of_range(
                "sustain_window",
                0,
                "must be >= 1",
            ));
        }
        if self.release_window == 0 {
            return Err(ConfigError::out_of_range(
                "release_window",
                0,
                "must be >= 1",
            ));
        }
        Ok(())
    }

    /// Return a copy with `patch` applied, validated as a whole.
    ///
    /// `self` is untouched when the patched result is invalid.
    pub fn apply(&self, patch: &SchedulerConfigPatch) -> ConfigResult<SchedulerConfig> {
        let mut next = self.clone();
        if let Some(v) = patch.min_pulse_interval_ms {
            next.min_pulse_interval_ms = v;
        }
        if let Some(v) = patch.max_pulse_interval_ms {
            next.max_pulse_interval_ms = v;
        }
        if let Some(v) = patch.cooldown_ms {
            next.cooldown_ms = v;
        }
        if let Some(v) = patch.max_cpu_percent {
            next.max_cpu_percent = v;
        }
        if let Some(v) = patch.max_memory_percent {
            next.max_memory_percent = v;
        }
        if let Some(v) = patch.burst_allowance_percent {
            next.burst_allowance_percent = v;
        }
        if let Some(v) = patch.adaptive_scaling {
            next.adaptive_scaling = v;
        }
        if let Some(v) = patch.max_concurrent_dispatches_per_tick {
            next.max_concurrent_dispatches_per_tick = v;
        }
        if let Some(v) = patch.sustain_window {
            next.sustain_window = v;
        }
        if let Some(v) = patch.release_window {
            next.release_window = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update for [`SchedulerConfig`]. `None` fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigPatch {
    pub min_pulse_interval_ms: Option<u64>,
    pub max_pulse_interval_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
    pub max_cpu_percent: Option<f64>,
    pub max_memory_percent: Option<f64>,
    pub burst_allowance_percent: Option<f64>,
    pub adaptive_scaling: Option<bool>,
    /// `Some(None)` (`null` in JSON) restores the pool-size default.
    #[serde(
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_concurrent_dispatches_per_tick: Option<Option<usize>>,
    pub sustain_window: Option<usize>,
    pub release_window: Option<usize>,
}

/// Keep an explicit `null` apart from a missing field.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SchedulerConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == SchedulerConfigPatch::default()
    }
}

// ── Sampler ────────────────────────────────────────────────────────

/// Warning/critical levels for one resource, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl AlertThresholds {
    pub fn validate(&self, field: &'static str) -> ConfigResult<()> {
        check_percent(field, self.warning)?;
        check_percent(field, self.critical)?;
        if self.warning > self.critical {
            return Err(ConfigError::out_of_range(
                field,
                format!("{}/{}", self.warning, self.critical),
                "warning must not exceed critical",
            ));
        }
        Ok(())
    }
}

/// Resource sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
    /// Snapshots retained in the history ring.
    pub history_capacity: usize,
    /// Raw CPU readings averaged into each reported value.
    pub cpu_window: usize,
    pub cpu: AlertThresholds,
    pub memory: AlertThresholds,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            history_capacity: 60,
            cpu_window: 5,
            cpu: AlertThresholds {
                warning: 70.0,
                critical: 85.0,
            },
            memory: AlertThresholds {
                warning: 75.0,
                critical: 90.0,
            },
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::out_of_range("interval_ms", 0, "must be > 0"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::out_of_range(
                "history_capacity",
                0,
                "must be >= 1",
            ));
        }
        if self.cpu_window == 0 {
            return Err(ConfigError::out_of_range("cpu_window", 0, "must be >= 1"));
        }
        self.cpu.validate("cpu thresholds")?;
        self.memory.validate("memory thresholds")
    }
}

fn check_percent(field: &'static str, value: f64) -> ConfigResult<()> {
    if !value.is_finite() || value <= 0.0 || value > 100.0 {
        return Err(ConfigError::out_of_range(field, value, "must be within (0, 100]"));
    }
    Ok(())
}
