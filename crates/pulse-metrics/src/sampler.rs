//! Resource sampler — periodic host snapshots with smoothing and alerts.
//!
//! The sampler owns its history ring exclusively. Readers get copies
//! (`latest()`, `history()`) or follow new snapshots through the watch
//! channel returned by `subscribe()`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use pulse_core::{EventBus, PulseEvent, ResourceKind, ResourceSnapshot, SamplerConfig};

use crate::alert::AlertTracker;
use crate::error::SampleResult;
use crate::probe::{HostProbe, SystemProbe};

/// Averages over a recent time window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceAverages {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub load_average_1m: f64,
    pub samples: usize,
}

/// Aggregate view of the retained history.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSummary {
    pub samples: usize,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub peak_cpu_percent: f64,
    pub peak_memory_percent: f64,
}

/// Mutable sampling state guarded by one lock.
struct SamplerState {
    /// Raw busy percentages feeding the moving average.
    cpu_window: VecDeque<f64>,
    history: VecDeque<ResourceSnapshot>,
    alerts: AlertTracker,
}

/// Handle to the background sampling task.
struct SamplerTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Periodically samples host CPU and memory.
pub struct ResourceSampler {
    config: SamplerConfig,
    cores: usize,
    probe: Mutex<Box<dyn HostProbe>>,
    state: Mutex<SamplerState>,
    events: EventBus,
    snapshots: watch::Sender<Option<ResourceSnapshot>>,
    task: Mutex<Option<SamplerTask>>,
}

impl ResourceSampler {
    /// Create a sampler over an arbitrary probe.
    pub fn new(config: SamplerConfig, probe: impl HostProbe + 'static, events: EventBus) -> Self {
        let cores = probe.cpu_count();
        let (snapshots, _) = watch::channel(None);
        Self {
            state: Mutex::new(SamplerState {
                cpu_window: VecDeque::with_capacity(config.cpu_window),
                history: VecDeque::with_capacity(config.history_capacity),
                alerts: AlertTracker::new(),
            }),
            config,
            cores,
            probe: Mutex::new(Box::new(probe)),
            events,
            snapshots,
            task: Mutex::new(None),
        }
    }

    /// Create a sampler over the local host.
    pub fn with_system(config: SamplerConfig, events: EventBus) -> Self {
        Self::new(config, SystemProbe::new(), events)
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Logical CPU count reported by the probe.
    pub fn cpu_count(&self) -> usize {
        self.cores
    }

    /// Start periodic sampling. A no-op while already running.
    ///
    /// The first sample is taken immediately.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("resource sampler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sampler = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            run_sampling_loop(sampler, interval, shutdown_rx).await;
        });
        *task = Some(SamplerTask {
            handle,
            shutdown_tx,
        });

        info!(interval_ms = interval.as_millis() as u64, "resource sampler started");
    }

    /// Stop periodic sampling. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            let _ = task.shutdown_tx.send(true);
            task.handle.abort();
            info!("resource sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Take one reading from the probe and record it.
    ///
    /// CPU is the probe's busy share since its previous reading, averaged
    /// over the last `cpu_window` readings.
    pub fn sample(&self) -> SampleResult<ResourceSnapshot> {
        let reading = lock(&self.probe).read()?;

        let snapshot = {
            let mut state = lock(&self.state);
            state.cpu_window.push_back(reading.cpu_percent);
            while state.cpu_window.len() > self.config.cpu_window {
                state.cpu_window.pop_front();
            }
            let cpu = state.cpu_window.iter().sum::<f64>() / state.cpu_window.len() as f64;

            ResourceSnapshot::new(cpu, reading.memory_percent(), reading.load_average)
        };

        self.record(snapshot.clone());
        Ok(snapshot)
    }

    /// Record a snapshot produced elsewhere.
    ///
    /// Goes through the same history, alerting and publication path as
    /// `sample()`. Hosts with their own telemetry feed snapshots in here.
    pub fn record(&self, snapshot: ResourceSnapshot) {
        let alerts = {
            let mut state = lock(&self.state);
            state.history.push_back(snapshot.clone());
            while state.history.len() > self.config.history_capacity {
                state.history.pop_front();
            }

            let cpu = state.alerts.observe(
                ResourceKind::Cpu,
                snapshot.cpu_percent,
                &self.config.cpu,
            );
            let memory = state.alerts.observe(
                ResourceKind::Memory,
                snapshot.memory_percent,
                &self.config.memory,
            );
            [cpu, memory]
        };

        debug!(
            cpu = format_args!("{:.1}", snapshot.cpu_percent),
            memory = format_args!("{:.1}", snapshot.memory_percent),
            load_1m = snapshot.load_1m(),
            "resource snapshot"
        );

        for alert in alerts.into_iter().flatten() {
            warn!(
                kind = %alert.kind,
                level = ?alert.level,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            );
            self.events.emit(PulseEvent::ResourceAlert(alert));
        }

        self.snapshots.send_replace(Some(snapshot));
    }

    /// Follow new snapshots as they are recorded.
    pub fn subscribe(&self) -> watch::Receiver<Option<ResourceSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn latest(&self) -> Option<ResourceSnapshot> {
        lock(&self.state).history.back().cloned()
    }

    /// Retained snapshots, oldest first.
    pub fn history(&self) -> Vec<ResourceSnapshot> {
        lock(&self.state).history.iter().cloned().collect()
    }

    /// The most recent `n` snapshots, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ResourceSnapshot> {
        let state = lock(&self.state);
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Averages over snapshots taken within the last `period`.
    pub fn average_over(&self, period: Duration) -> Option<ResourceAverages> {
        let now = Instant::now();
        let state = lock(&self.state);
        let recent: Vec<&ResourceSnapshot> = state
            .history
            .iter()
            .filter(|s| now.saturating_duration_since(s.taken_at) <= period)
            .collect();

        if recent.is_empty() {
            return None;
        }
        let n = recent.len() as f64;
        Some(ResourceAverages {
            cpu_percent: recent.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
            memory_percent: recent.iter().map(|s| s.memory_percent).sum::<f64>() / n,
            load_average_1m: recent.iter().map(|s| s.load_1m()).sum::<f64>() / n,
            samples: recent.len(),
        })
    }

    /// Average and peak utilization over the whole history.
    pub fn summary(&self) -> MetricsSummary {
        let state = lock(&self.state);
        if state.history.is_empty() {
            return MetricsSummary::default();
        }
        let n = state.history.len() as f64;
        MetricsSummary {
            samples: state.history.len(),
            avg_cpu_percent: state.history.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
            avg_memory_percent: state.history.iter().map(|s| s.memory_percent).sum::<f64>() / n,
            peak_cpu_percent: state
                .history
                .iter()
                .map(|s| s.cpu_percent)
                .fold(0.0, f64::max),
            peak_memory_percent: state
                .history
                .iter()
                .map(|s| s.memory_percent)
                .fold(0.0, f64::max),
        }
    }

    /// True while no resource sits at or above its warning threshold.
    pub fn is_healthy(&self) -> bool {
        lock(&self.state).alerts.is_clear()
    }

    /// Operator hints for the latest snapshot.
    pub fn recommendations(&self) -> Vec<String> {
        let Some(latest) = self.latest() else {
            return Vec::new();
        };
        let mut out = Vec::new();

        if latest.cpu_percent > self.config.cpu.warning {
            out.push("reduce concurrent dispatches per tick".to_string());
            out.push("raise the pulse interval for non-critical work".to_string());
        }
        if latest.memory_percent > self.config.memory.warning {
            out.push("lower per-task memory usage".to_string());
            out.push("shed or defer low-priority work".to_string());
        }
        if latest.load_1m() > self.cores as f64 {
            out.push("host is overloaded: reduce the worker pool".to_string());
        }
        out
    }
}

async fn run_sampling_loop(
    sampler: Weak<ResourceSampler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(sampler) = sampler.upgrade() else {
                    debug!("resource sampler dropped, loop exiting");
                    break;
                };
                if let Err(e) = sampler.sample() {
                    warn!(error = %e, "resource sample failed, skipping cycle");
                }
            }
            _ = shutdown.changed() => {
                debug!("sampling loop shutting down");
                break;
            }
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SampleError;
    use crate::probe::{HostReading, ScriptedProbe};
    use pulse_core::{AlertLevel, AlertThresholds};

    fn reading(cpu_percent: f64, memory_percent: u64) -> HostReading {
        HostReading {
            cpu_percent,
            memory_total_bytes: 100,
            memory_free_bytes: 100 - memory_percent,
            load_average: [0.5, 0.5, 0.5],
        }
    }

    /// One reading per raw CPU percentage, all at the same memory level.
    fn script(cpu_per_step: &[u64], memory_percent: u64) -> ScriptedProbe {
        let mut probe = ScriptedProbe::new().with_cpu_count(2);
        for cpu in cpu_per_step {
            probe.push(reading(*cpu as f64, memory_percent));
        }
        probe
    }

    fn sampler(probe: ScriptedProbe, config: SamplerConfig) -> ResourceSampler {
        ResourceSampler::new(config, probe, EventBus::default())
    }

    #[test]
    fn cpu_is_smoothed_over_window() {
        let config = SamplerConfig {
            cpu_window: 2,
            ..SamplerConfig::default()
        };
        let s = sampler(script(&[100, 0, 50], 10), config);

        assert_eq!(s.sample().unwrap().cpu_percent, 100.0);
        // (100 + 0) / 2
        assert_eq!(s.sample().unwrap().cpu_percent, 50.0);
        // (0 + 50) / 2, the first reading fell out of the window
        assert_eq!(s.sample().unwrap().cpu_percent, 25.0);
    }

    #[test]
    fn samples_local_host() {
        let s = ResourceSampler::with_system(SamplerConfig::default(), EventBus::default());
        assert!(s.cpu_count() >= 1);

        let snapshot = s.sample().unwrap();
        assert!(snapshot.memory_percent > 0.0 && snapshot.memory_percent <= 100.0);
        assert!((0.0..=100.0).contains(&snapshot.cpu_percent));
        assert_eq!(s.history().len(), 1);
        assert!(s.latest().is_some());
    }

    #[test]
    fn memory_percent_from_total_and_free() {
        let s = sampler(script(&[10], 42), SamplerConfig::default());
        assert!((s.sample().unwrap().memory_percent - 42.0).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let config = SamplerConfig {
            history_capacity: 3,
            cpu_window: 1,
            ..SamplerConfig::default()
        };
        let s = sampler(script(&[10, 20, 30, 40, 50], 10), config);
        for _ in 0..5 {
            s.sample().unwrap();
        }

        let cpu: Vec<f64> = s.history().iter().map(|h| h.cpu_percent.round()).collect();
        assert_eq!(cpu, vec![30.0, 40.0, 50.0]);
        assert_eq!(s.latest().unwrap().cpu_percent.round(), 50.0);
        assert_eq!(s.recent(2).len(), 2);
        assert_eq!(s.recent(10).len(), 3);
    }

    #[test]
    fn probe_error_leaves_state_untouched() {
        let mut probe = script(&[10], 10);
        probe.push_error(SampleError::Unavailable("boom".into()));
        let s = sampler(probe, SamplerConfig::default());

        s.sample().unwrap();
        assert!(s.sample().is_err());
        assert_eq!(s.history().len(), 1);
    }

    #[tokio::test]
    async fn alerts_are_emitted_on_crossings() {
        let config = SamplerConfig {
            cpu_window: 1,
            cpu: AlertThresholds {
                warning: 50.0,
                critical: 90.0,
            },
            ..SamplerConfig::default()
        };
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let s = ResourceSampler::new(config, script(&[60, 70, 95, 95], 10), bus);

        for _ in 0..4 {
            s.sample().unwrap();
        }

        let mut levels = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PulseEvent::ResourceAlert(alert) = event {
                assert_eq!(alert.kind, ResourceKind::Cpu);
                levels.push(alert.level);
            }
        }
        assert_eq!(levels, vec![AlertLevel::Warning, AlertLevel::Critical]);
        assert!(!s.is_healthy());
    }

    #[test]
    fn summary_reports_avg_and_peak() {
        let config = SamplerConfig {
            cpu_window: 1,
            ..SamplerConfig::default()
        };
        let s = sampler(script(&[20, 40, 60], 30), config);
        assert_eq!(s.summary(), MetricsSummary::default());
        for _ in 0..3 {
            s.sample().unwrap();
        }

        let summary = s.summary();
        assert_eq!(summary.samples, 3);
        assert!((summary.avg_cpu_percent - 40.0).abs() < 1e-9);
        assert!((summary.peak_cpu_percent - 60.0).abs() < 1e-9);
        assert!((summary.peak_memory_percent - 30.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn average_over_only_counts_recent_snapshots() {
        let s = sampler(ScriptedProbe::new(), SamplerConfig::default());
        s.record(ResourceSnapshot::new(90.0, 90.0, [4.0, 0.0, 0.0]));
        tokio::time::advance(Duration::from_secs(10)).await;
        s.record(ResourceSnapshot::new(10.0, 20.0, [1.0, 0.0, 0.0]));
        s.record(ResourceSnapshot::new(30.0, 40.0, [3.0, 0.0, 0.0]));

        let avg = s.average_over(Duration::from_secs(5)).unwrap();
        assert_eq!(avg.samples, 2);
        assert_eq!(avg.cpu_percent, 20.0);
        assert_eq!(avg.memory_percent, 30.0);
        assert_eq!(avg.load_average_1m, 2.0);

        assert_eq!(s.average_over(Duration::from_secs(60)).unwrap().samples, 3);
    }

    #[test]
    fn average_over_empty_history_is_none() {
        let s = sampler(ScriptedProbe::new(), SamplerConfig::default());
        assert!(s.average_over(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn recommendations_follow_latest_snapshot() {
        let s = sampler(ScriptedProbe::new().with_cpu_count(2), SamplerConfig::default());
        assert!(s.recommendations().is_empty());

        s.record(ResourceSnapshot::new(95.0, 20.0, [4.0, 1.0, 1.0]));
        let recs = s.recommendations();
        assert!(recs.iter().any(|r| r.contains("dispatches")));
        assert!(recs.iter().any(|r| r.contains("overloaded")));
        assert!(!recs.iter().any(|r| r.contains("memory")));
    }

    #[tokio::test]
    async fn subscribers_see_each_snapshot() {
        let s = sampler(script(&[10], 10), SamplerConfig::default());
        let mut rx = s.subscribe();
        assert!(rx.borrow().is_none());

        s.sample().unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sampling_start_stop() {
        let mut probe = script(&[10, 20], 10);
        probe.push_error(SampleError::Unavailable("transient".into()));
        let s = Arc::new(sampler(probe, SamplerConfig::default()));

        s.start(Duration::from_secs(1));
        s.start(Duration::from_secs(1)); // idempotent
        assert!(s.is_running());

        tokio::time::sleep(Duration::from_millis(4500)).await;
        // Ticks at 0..=4s: two scripted readings, one failure, then the
        // last reading repeats.
        assert_eq!(s.history().len(), 4);

        s.stop();
        s.stop(); // safe when stopped
        assert!(!s.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(s.history().len(), 4);
    }
}
