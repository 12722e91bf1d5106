//! Throttle gate — hysteresis state machine over resource snapshots.
//!
//! `evaluate()` is the only place the state changes. It is fed the most
//! recent snapshots either by `run()` (following the sampler) or directly
//! by callers that bring their own telemetry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use pulse_core::{EventBus, PulseEvent, ResourceSnapshot, SchedulerConfig};
use pulse_metrics::ResourceSampler;

/// Release threshold as a fraction of the configured maximum.
const RELEASE_FACTOR: f64 = 0.9;

/// Limits the gate judges snapshots against.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleLimits {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub burst_allowance_percent: f64,
    pub adaptive: bool,
    pub cooldown: Duration,
    /// Snapshots averaged when judging sustained pressure.
    pub sustain_window: usize,
    /// Consecutive calm snapshots required to release.
    pub release_window: usize,
}

impl ThrottleLimits {
    /// Snapshots the gate needs to look back over.
    pub fn window(&self) -> usize {
        self.sustain_window.max(self.release_window).max(1)
    }

    fn exceeds(&self, recent: &[f64], max: f64) -> bool {
        let Some(&current) = recent.last() else {
            return false;
        };
        if !self.adaptive {
            return current > max;
        }
        let average = recent.iter().sum::<f64>() / recent.len() as f64;
        average > max && current > max + self.burst_allowance_percent
    }

    fn under_pressure(&self, history: &[ResourceSnapshot]) -> bool {
        let recent = tail(history, self.sustain_window.max(1));
        let cpu: Vec<f64> = recent.iter().map(|s| s.cpu_percent).collect();
        let memory: Vec<f64> = recent.iter().map(|s| s.memory_percent).collect();
        self.exceeds(&cpu, self.max_cpu_percent)
            || self.exceeds(&memory, self.max_memory_percent)
    }

    fn calm(&self, history: &[ResourceSnapshot]) -> bool {
        if history.len() < self.release_window {
            return false;
        }
        tail(history, self.release_window).iter().all(|s| {
            s.cpu_percent < self.max_cpu_percent * RELEASE_FACTOR
                && s.memory_percent < self.max_memory_percent * RELEASE_FACTOR
        })
    }
}

impl From<&SchedulerConfig> for ThrottleLimits {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_cpu_percent: config.max_cpu_percent,
            max_memory_percent: config.max_memory_percent,
            burst_allowance_percent: config.burst_allowance_percent,
            adaptive: config.adaptive_scaling,
            cooldown: config.cooldown(),
            sustain_window: config.sustain_window,
            release_window: config.release_window,
        }
    }
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// Current gate state. `active` implies `activated_at` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    pub active: bool,
    pub activated_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
}

/// A state change produced by `evaluate()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Throttled,
    Released,
}

/// Exported view of the gate.
#[derive(Debug, Clone, Serialize)]
pub struct ThrottleStatus {
    pub throttled: bool,
    /// Time left before release may be considered.
    pub cooldown_remaining_ms: Option<u64>,
    pub current: Option<ResourceSnapshot>,
    pub throttle_count: u64,
}

/// Decides whether the scheduler may dispatch.
pub struct ThrottleGate {
    limits: Mutex<ThrottleLimits>,
    state: watch::Sender<ThrottleState>,
    current: Mutex<Option<ResourceSnapshot>>,
    throttle_count: AtomicU64,
    events: EventBus,
}

impl ThrottleGate {
    pub fn new(limits: ThrottleLimits, events: EventBus) -> Self {
        let (state, _) = watch::channel(ThrottleState::default());
        Self {
            limits: Mutex::new(limits),
            state,
            current: Mutex::new(None),
            throttle_count: AtomicU64::new(0),
            events,
        }
    }

    pub fn limits(&self) -> ThrottleLimits {
        lock(&self.limits).clone()
    }

    /// Replace the limits. Takes effect on the next evaluation; the
    /// current state and cooldown are kept.
    pub fn update_limits(&self, limits: ThrottleLimits) {
        debug!(?limits, "throttle limits updated");
        *lock(&self.limits) = limits;
    }

    pub fn is_throttled(&self) -> bool {
        self.state.borrow().active
    }

    pub fn state(&self) -> ThrottleState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<ThrottleState> {
        self.state.subscribe()
    }

    /// Number of Clear → Throttled transitions so far.
    pub fn throttle_count(&self) -> u64 {
        self.throttle_count.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ThrottleStatus {
        let state = self.state();
        let now = Instant::now();
        ThrottleStatus {
            throttled: state.active,
            cooldown_remaining_ms: state
                .cooldown_until
                .filter(|_| state.active)
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
            current: lock(&self.current).clone(),
            throttle_count: self.throttle_count(),
        }
    }

    /// Resolve once the gate is clear. Returns immediately if it already is.
    pub async fn wait_until_clear(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| !state.active).await;
    }

    /// Evaluate `history` (oldest first, current snapshot last) now.
    pub fn evaluate(&self, history: &[ResourceSnapshot]) -> Option<Transition> {
        self.evaluate_at(history, Instant::now())
    }

    /// Evaluate `history` as of `now`.
    pub fn evaluate_at(&self, history: &[ResourceSnapshot], now: Instant) -> Option<Transition> {
        let current = history.last()?.clone();
        *lock(&self.current) = Some(current.clone());

        let limits = self.limits();
        let state = self.state();

        if !state.active {
            if !limits.under_pressure(history) {
                return None;
            }
            let cooldown_until = now + limits.cooldown;
            self.state.send_replace(ThrottleState {
                active: true,
                activated_at: Some(now),
                cooldown_until: Some(cooldown_until),
            });
            self.throttle_count.fetch_add(1, Ordering::Relaxed);

            info!(
                cpu = format_args!("{:.1}", current.cpu_percent),
                memory = format_args!("{:.1}", current.memory_percent),
                cooldown_ms = limits.cooldown.as_millis() as u64,
                "throttle engaged"
            );
            self.events.emit(PulseEvent::Throttle {
                snapshot: current,
                cooldown_ms: limits.cooldown.as_millis() as u64,
            });
            return Some(Transition::Throttled);
        }

        if state.cooldown_until.is_some_and(|until| now < until) {
            return None;
        }
        if !limits.calm(history) {
            return None;
        }

        self.state.send_replace(ThrottleState::default());
        info!(
            cpu = format_args!("{:.1}", current.cpu_percent),
            memory = format_args!("{:.1}", current.memory_percent),
            throttled_ms = state
                .activated_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            "throttle released"
        );
        self.events.emit(PulseEvent::Release { snapshot: current });
        Some(Transition::Released)
    }

    /// Evaluate every snapshot the sampler publishes until shutdown.
    pub async fn run(self: Arc<Self>, sampler: Arc<ResourceSampler>, mut shutdown: watch::Receiver<bool>) {
        let mut snapshots = sampler.subscribe();
        info!("throttle gate started");

        if sampler.latest().is_some() {
            self.evaluate(&sampler.recent(self.limits().window()));
        }

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        debug!("snapshot channel closed, gate loop exiting");
                        break;
                    }
                    snapshots.borrow_and_update();
                    let history = sampler.recent(self.limits().window());
                    self.evaluate(&history);
                }
                _ = shutdown.changed() => {
                    info!("throttle gate shutting down");
                    break;
                }
            }
        }
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::SamplerConfig;
    use pulse_metrics::ScriptedProbe;

    fn limits() -> ThrottleLimits {
        ThrottleLimits {
            max_cpu_percent: 70.0,
            max_memory_percent: 80.0,
            burst_allowance_percent: 10.0,
            adaptive: true,
            cooldown: Duration::from_secs(5),
            sustain_window: 2,
            release_window: 3,
        }
    }

    fn cpu(value: f64) -> ResourceSnapshot {
        ResourceSnapshot::new(value, 20.0, [0.0; 3])
    }

    /// Feed `values` one second apart, returning each step's transition.
    fn feed(gate: &ThrottleGate, values: &[f64], start: Instant) -> Vec<Option<Transition>> {
        let mut history = Vec::new();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                history.push(cpu(*v));
                gate.evaluate_at(&history, start + Duration::from_secs(i as u64))
            })
            .collect()
    }

    #[test]
    fn sustained_pressure_throttles_on_fourth_sample() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        let steps = feed(&gate, &[60.0, 60.0, 60.0, 82.0, 82.0], Instant::now());

        assert_eq!(
            steps,
            vec![None, None, None, Some(Transition::Throttled), None]
        );
        assert!(gate.is_throttled());
        assert_eq!(gate.throttle_count(), 1);
    }

    #[test]
    fn short_spike_does_not_throttle_in_adaptive_mode() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        let steps = feed(&gate, &[50.0, 50.0, 85.0, 40.0], Instant::now());
        assert!(steps.iter().all(Option::is_none));
        assert!(!gate.is_throttled());
    }

    #[test]
    fn non_adaptive_throttles_on_current_value() {
        let gate = ThrottleGate::new(
            ThrottleLimits {
                adaptive: false,
                ..limits()
            },
            EventBus::default(),
        );
        let steps = feed(&gate, &[70.0, 71.0], Instant::now());
        assert_eq!(steps, vec![None, Some(Transition::Throttled)]);
    }

    #[test]
    fn memory_pressure_throttles_too() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        let history = vec![
            ResourceSnapshot::new(10.0, 85.0, [0.0; 3]),
            ResourceSnapshot::new(10.0, 95.0, [0.0; 3]),
        ];
        assert_eq!(gate.evaluate(&history), Some(Transition::Throttled));
    }

    #[test]
    fn release_waits_for_cooldown_and_calm_window() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        let start = Instant::now();
        // Throttle at t=0, then calm readings every second.
        let steps = feed(&gate, &[95.0, 10.0, 10.0, 10.0, 10.0, 10.0], start);

        assert_eq!(steps[0], Some(Transition::Throttled));
        // t=1..4 are inside the cooldown.
        assert!(steps[1..5].iter().all(Option::is_none));
        assert_eq!(steps[5], Some(Transition::Released));

        let state = gate.state();
        assert!(!state.active);
        assert!(state.activated_at.is_none());
    }

    #[test]
    fn release_needs_every_recent_snapshot_below_ninety_percent() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        let start = Instant::now();
        // 0.9 × 70 = 63; the reading of 64 keeps the gate shut until it
        // leaves the three-snapshot window.
        let steps = feed(
            &gate,
            &[95.0, 10.0, 10.0, 10.0, 10.0, 64.0, 62.0, 62.0, 62.0],
            start,
        );
        assert_eq!(steps[0], Some(Transition::Throttled));
        assert!(steps[1..8].iter().all(Option::is_none));
        assert_eq!(steps[8], Some(Transition::Released));
    }

    #[test]
    fn oscillating_stream_throttles_at_most_once_per_cooldown() {
        let gate = ThrottleGate::new(
            ThrottleLimits {
                adaptive: false,
                ..limits()
            },
            EventBus::default(),
        );
        let start = Instant::now();
        let values: Vec<f64> = (0..24)
            .map(|i| if i % 4 == 0 { 95.0 } else { 10.0 })
            .collect();
        let steps = feed(&gate, &values, start);

        let throttled_at: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Some(Transition::Throttled))
            .map(|(i, _)| i)
            .collect();
        let released_at: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Some(Transition::Released))
            .map(|(i, _)| i)
            .collect();

        assert!(throttled_at.len() >= 2);
        for pair in throttled_at.windows(2) {
            assert!(pair[1] - pair[0] >= 5, "throttled at {pair:?}");
        }
        for (throttle, release) in throttled_at.iter().zip(&released_at) {
            assert!(release - throttle >= 5);
        }
    }

    #[test]
    fn alternating_readings_never_release() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        let values: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 95.0 } else { 10.0 })
            .collect();
        let steps = feed(&gate, &values, Instant::now());

        let toggles = steps.iter().filter(|t| t.is_some()).count();
        assert_eq!(toggles, 1);
        assert!(gate.is_throttled());
    }

    #[test]
    fn update_limits_applies_to_next_evaluation() {
        let gate = ThrottleGate::new(
            ThrottleLimits {
                adaptive: false,
                ..limits()
            },
            EventBus::default(),
        );
        gate.update_limits(ThrottleLimits {
            adaptive: false,
            max_cpu_percent: 90.0,
            ..limits()
        });
        assert_eq!(gate.evaluate(&[cpu(85.0)]), None);
        assert_eq!(gate.evaluate(&[cpu(91.0)]), Some(Transition::Throttled));
    }

    #[test]
    fn status_reports_cooldown_and_current() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        let idle = gate.status();
        assert!(!idle.throttled);
        assert!(idle.current.is_none());
        assert!(idle.cooldown_remaining_ms.is_none());

        gate.evaluate(&[cpu(95.0)]);
        let status = gate.status();
        assert!(status.throttled);
        assert_eq!(status.throttle_count, 1);
        assert!(status.cooldown_remaining_ms.unwrap() <= 5000);
        assert_eq!(status.current.unwrap().cpu_percent, 95.0);
    }

    #[test]
    fn events_carry_triggering_snapshot() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let gate = ThrottleGate::new(limits(), bus);
        let start = Instant::now();
        feed(&gate, &[95.0, 10.0, 10.0, 10.0, 10.0, 12.0], start);

        match rx.try_recv().unwrap() {
            PulseEvent::Throttle {
                snapshot,
                cooldown_ms,
            } => {
                assert_eq!(snapshot.cpu_percent, 95.0);
                assert_eq!(cooldown_ms, 5000);
            }
            other => panic!("expected throttle, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            PulseEvent::Release { snapshot } => assert_eq!(snapshot.cpu_percent, 12.0),
            other => panic!("expected release, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_waiters_released_together() {
        let gate = Arc::new(ThrottleGate::new(limits(), EventBus::default()));
        let start = Instant::now();
        gate.evaluate_at(&[cpu(95.0)], start);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait_until_clear().await })
            })
            .collect();
        tokio::task::yield_now().await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        let calm = vec![cpu(10.0), cpu(10.0), cpu(10.0)];
        let released = gate.evaluate_at(&calm, start + Duration::from_secs(6));
        assert_eq!(released, Some(Transition::Released));

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn wait_until_clear_returns_immediately_when_clear() {
        let gate = ThrottleGate::new(limits(), EventBus::default());
        tokio::time::timeout(Duration::from_millis(10), gate.wait_until_clear())
            .await
            .expect("already clear");
    }

    #[tokio::test]
    async fn run_follows_sampler_snapshots() {
        let bus = EventBus::default();
        let sampler = Arc::new(ResourceSampler::new(
            SamplerConfig::default(),
            ScriptedProbe::new(),
            bus.clone(),
        ));
        let gate = Arc::new(ThrottleGate::new(
            ThrottleLimits {
                adaptive: false,
                ..limits()
            },
            bus,
        ));
        let mut state = gate.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(gate.clone().run(sampler.clone(), shutdown_rx));
        tokio::task::yield_now().await;

        sampler.record(cpu(95.0));
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| s.active))
            .await
            .expect("gate throttled")
            .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("gate loop stopped")
            .unwrap();
    }
}
