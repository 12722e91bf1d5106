//! Edge-triggered threshold alerts.
//!
//! Each resource carries its current alert level. An alert fires only when
//! the level rises (clear → warning, clear → critical, warning → critical);
//! staying at a level is silent, and falling back lowers the level so a
//! later rise fires again.

use pulse_core::{AlertLevel, AlertThresholds, ResourceAlert, ResourceKind, epoch_millis};

#[derive(Debug, Default, Clone)]
pub struct AlertTracker {
    cpu: Option<AlertLevel>,
    memory: Option<AlertLevel>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading and return an alert if it raised the level.
    pub fn observe(
        &mut self,
        kind: ResourceKind,
        value: f64,
        thresholds: &AlertThresholds,
    ) -> Option<ResourceAlert> {
        let level = level_for(value, thresholds);
        let slot = match kind {
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Memory => &mut self.memory,
        };
        let previous = std::mem::replace(slot, level);

        // `None < Some(Warning) < Some(Critical)`.
        if level <= previous {
            return None;
        }
        let level = level?;
        let threshold = match level {
            AlertLevel::Warning => thresholds.warning,
            AlertLevel::Critical => thresholds.critical,
        };
        let message = match level {
            AlertLevel::Warning => format!("{kind} usage high: {value:.1}%"),
            AlertLevel::Critical => format!("{kind} usage critical: {value:.1}%"),
        };

        Some(ResourceAlert {
            kind,
            level,
            value,
            threshold,
            message,
            epoch_ms: epoch_millis(),
        })
    }

    /// Current level for a resource, `None` when below warning.
    pub fn level(&self, kind: ResourceKind) -> Option<AlertLevel> {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
        }
    }

    /// No resource is at or above its warning threshold.
    pub fn is_clear(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }
}

fn level_for(value: f64, thresholds: &AlertThresholds) -> Option<AlertLevel> {
    if value >= thresholds.critical {
        Some(AlertLevel::Critical)
    } else if value >= thresholds.warning {
        Some(AlertLevel::Warning)
    } else {
        None
    }
}
