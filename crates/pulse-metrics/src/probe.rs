//! Host metric probes.
//!
//! A [`HostProbe`] returns one raw, unsmoothed reading per call; smoothing
//! and history are the sampler's job. [`SystemProbe`] asks the operating
//! system through `sysinfo`, [`ScriptedProbe`] replays canned readings.

use std::collections::VecDeque;

use sysinfo::System;

use crate::error::{SampleError, SampleResult};

/// One raw reading of the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostReading {
    /// Busy share of all cores since the previous reading, in percent.
    pub cpu_percent: f64,
    pub memory_total_bytes: u64,
    pub memory_free_bytes: u64,
    pub load_average: [f64; 3],
}

impl HostReading {
    /// `(total - free) / total * 100`, or 0 when the total is unknown.
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        let used = self.memory_total_bytes.saturating_sub(self.memory_free_bytes);
        (used as f64 / self.memory_total_bytes as f64) * 100.0
    }
}

/// Source of raw host readings.
pub trait HostProbe: Send {
    fn read(&mut self) -> SampleResult<HostReading>;

    /// Logical CPU count, used to judge load averages.
    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

// ── sysinfo ────────────────────────────────────────────────────────

/// Reads CPU, memory and load from the local host.
///
/// CPU usage is the delta between two refreshes, so the first reading
/// after construction covers only the time since `new()`.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe")
            .field("cpus", &self.system.cpus().len())
            .finish()
    }
}

impl HostProbe for SystemProbe {
    fn read(&mut self) -> SampleResult<HostReading> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let memory_total_bytes = self.system.total_memory();
        if memory_total_bytes == 0 {
            return Err(SampleError::Unavailable(
                "host reports no memory".to_string(),
            ));
        }

        let cpu_percent = f64::from(self.system.global_cpu_usage());
        let load = System::load_average();
        Ok(HostReading {
            cpu_percent: if cpu_percent.is_finite() {
                cpu_percent.clamp(0.0, 100.0)
            } else {
                0.0
            },
            memory_total_bytes,
            memory_free_bytes: self.system.available_memory(),
            load_average: [load.one, load.five, load.fifteen],
        })
    }

    fn cpu_count(&self) -> usize {
        self.system.cpus().len().max(1)
    }
}

// ── scripted ───────────────────────────────────────────────────────

/// Replays a fixed sequence of readings.
///
/// Once the script is exhausted the last successful reading repeats, so a
/// long-running sampler keeps producing snapshots.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    script: VecDeque<SampleResult<HostReading>>,
    last: Option<HostReading>,
    cpu_count: usize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            cpu_count: 1,
            ..Self::default()
        }
    }

    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    pub fn push(&mut self, reading: HostReading) -> &mut Self {
        self.script.push_back(Ok(reading));
        self
    }

    pub fn push_error(&mut self, error: SampleError) -> &mut Self {
        self.script.push_back(Err(error));
        self
    }
}

impl HostProbe for ScriptedProbe {
    fn read(&mut self) -> SampleResult<HostReading> {
        match self.script.pop_front() {
            Some(Ok(reading)) => {
                self.last = Some(reading);
                Ok(reading)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .ok_or_else(|| SampleError::Unavailable("script exhausted".to_string())),
        }
    }

    fn cpu_count(&self) -> usize {
        self.cpu_count.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_probe_reads_local_host() {
        let mut probe = SystemProbe::new();
        assert!(probe.cpu_count() >= 1);

        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let reading = probe.read().unwrap();
        assert!(reading.memory_total_bytes > 0);
        assert!((0.0..=100.0).contains(&reading.cpu_percent));
        assert!((0.0..=100.0).contains(&reading.memory_percent()));
        assert!(reading.load_average.iter().all(|l| *l >= 0.0));
    }

    #[test]
    fn memory_percent_handles_zero_total() {
        let reading = HostReading {
            cpu_percent: 0.0,
            memory_total_bytes: 0,
            memory_free_bytes: 0,
            load_average: [0.0; 3],
        };
        assert_eq!(reading.memory_percent(), 0.0);
    }

    #[test]
    fn memory_percent_from_total_and_free() {
        let reading = HostReading {
            cpu_percent: 0.0,
            memory_total_bytes: 16_000,
            memory_free_bytes: 4_000,
            load_average: [0.0; 3],
        };
        assert!((reading.memory_percent() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn scripted_probe_repeats_last_reading() {
        let reading = HostReading {
            cpu_percent: 50.0,
            memory_total_bytes: 100,
            memory_free_bytes: 50,
            load_average: [0.1, 0.2, 0.3],
        };
        let mut probe = ScriptedProbe::new();
        assert!(probe.read().is_err());

        probe.push(reading);
        assert_eq!(probe.read().unwrap(), reading);
        assert_eq!(probe.read().unwrap(), reading);
    }

    #[test]
    fn scripted_probe_replays_errors_in_order() {
        let reading = HostReading {
            cpu_percent: 10.0,
            memory_total_bytes: 100,
            memory_free_bytes: 90,
            load_average: [0.0; 3],
        };
        let mut probe = ScriptedProbe::new();
        probe
            .push_error(SampleError::Unavailable("offline".into()))
            .push(reading);

        assert!(matches!(probe.read(), Err(SampleError::Unavailable(_))));
        assert_eq!(probe.read().unwrap(), reading);
    }
}
