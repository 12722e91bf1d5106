//! Pulse scheduler — the periodic admission loop.
//!
//! Each pulse:
//! - applies finished executions to the worker pool
//! - sheds work below `High` if the gate is throttled, and stops there
//! - otherwise pairs ready workers (registration order) with the highest
//!   priority tasks, up to the per-tick cap
//! - hands each task to the executor on its own tokio task, never
//!   awaiting it
//! - recomputes the delay until the next pulse
//!
//! Executions report back over an mpsc channel. The pulse loop owns the
//! receiving end while running, so it is the one place worker records
//! are released.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use pulse_core::{
    EventBus, Priority, PulseEvent, PulseMetrics, SchedulerConfig, SchedulerConfigPatch, TaskId,
    WorkerId,
};
use pulse_metrics::ResourceSampler;
use pulse_throttle::{ThrottleGate, ThrottleLimits};

use crate::error::SchedulerResult;
use crate::interval::pulse_interval;
use crate::pool::WorkerPool;
use crate::queue::{Task, TaskQueue};
use crate::status::{SchedulerStatus, TaskCounters};

/// Future returned by an [`Executor`].
pub type ExecFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Callback that runs a task payload on a worker.
///
/// The scheduler calls this with (worker_id, payload). An `Err` or a panic
/// marks the task failed; there is no retry.
pub type Executor = Arc<dyn Fn(WorkerId, Value) -> ExecFuture + Send + Sync>;

/// Wrap an async closure as an [`Executor`].
pub fn executor_fn<F, Fut>(f: F) -> Executor
where
    F: Fn(WorkerId, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |worker_id, payload| Box::pin(f(worker_id, payload)))
}

/// A finished execution on its way back to the pulse loop.
struct Completion {
    task_id: TaskId,
    worker_id: WorkerId,
    started_at: Instant,
    finished_at: Instant,
    outcome: Result<(), String>,
}

/// Queue, pool and counters, guarded by one lock.
struct SchedulerState {
    queue: TaskQueue,
    pool: WorkerPool,
    next_task_id: u64,
    interval: Duration,
    in_flight: usize,
    counters: TaskCounters,
}

/// Background tasks started by `start()`.
struct LoopSlot {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

/// What one pulse did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub throttled: bool,
    pub shed: usize,
    pub dispatched: Vec<(TaskId, WorkerId)>,
    /// Delay until the next pulse.
    pub interval: Duration,
}

pub struct PulseScheduler {
    config: Mutex<SchedulerConfig>,
    state: Mutex<SchedulerState>,
    gate: Arc<ThrottleGate>,
    sampler: Arc<ResourceSampler>,
    events: EventBus,
    executor: Executor,
    completion_tx: mpsc::UnboundedSender<Completion>,
    /// `None` while the pulse loop holds it.
    completion_rx: Mutex<Option<mpsc::UnboundedReceiver<Completion>>>,
    running: Mutex<Option<LoopSlot>>,
}

impl PulseScheduler {
    /// Create a scheduler. The throttle gate is built from `config`.
    pub fn new(
        config: SchedulerConfig,
        sampler: Arc<ResourceSampler>,
        events: EventBus,
        executor: Executor,
    ) -> SchedulerResult<Self> {
        config.validate()?;

        let gate = Arc::new(ThrottleGate::new(
            ThrottleLimits::from(&config),
            events.clone(),
        ));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            state: Mutex::new(SchedulerState {
                queue: TaskQueue::new(),
                pool: WorkerPool::new(),
                next_task_id: 1,
                interval: config.min_interval(),
                in_flight: 0,
                counters: TaskCounters::default(),
            }),
            config: Mutex::new(config),
            gate,
            sampler,
            events,
            executor,
            completion_tx,
            completion_rx: Mutex::new(Some(completion_rx)),
            running: Mutex::new(None),
        })
    }

    pub fn gate(&self) -> &Arc<ThrottleGate> {
        &self.gate
    }

    pub fn sampler(&self) -> &Arc<ResourceSampler> {
        &self.sampler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> SchedulerConfig {
        lock(&self.config).clone()
    }

    pub fn register_worker(&self, worker_id: impl Into<WorkerId>) -> SchedulerResult<()> {
        let worker_id = worker_id.into();
        lock(&self.state).pool.register(worker_id.clone())?;
        info!(%worker_id, "worker registered");
        Ok(())
    }

    /// Queue a task. Never blocks and never rejects.
    pub fn submit(&self, priority: Priority, payload: Value) -> TaskId {
        let mut state = lock(&self.state);
        let id = TaskId(state.next_task_id);
        state.next_task_id += 1;
        state.counters.submitted += 1;
        state.queue.push(Task {
            id,
            priority,
            payload,
            enqueued_at: Instant::now(),
        });
        debug!(task_id = %id, %priority, queue_depth = state.queue.len(), "task submitted");
        id
    }

    /// Queue a task whose priority arrives as text.
    pub fn submit_named(&self, priority: &str, payload: Value) -> SchedulerResult<TaskId> {
        let priority: Priority = priority.parse()?;
        Ok(self.submit(priority, payload))
    }

    /// Apply a partial config update. Takes effect on the next pulse.
    ///
    /// An invalid result is rejected and the current config is kept.
    pub fn update_config(&self, patch: &SchedulerConfigPatch) -> SchedulerResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut config = lock(&self.config);
        let next = config.apply(patch)?;
        self.gate.update_limits(ThrottleLimits::from(&next));
        *config = next;
        info!(?patch, "scheduler config updated");
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        let now = Instant::now();
        let state = lock(&self.state);
        SchedulerStatus {
            running,
            throttled: self.gate.is_throttled(),
            throttle_count: self.gate.throttle_count(),
            interval_ms: state.interval.as_millis() as u64,
            queue: state.queue.depth(),
            workers: state.pool.status(now),
            in_flight: state.in_flight,
            tasks: state.counters,
            resources: self.sampler.latest(),
        }
    }

    /// Run one pulse now.
    ///
    /// Must be called from within a tokio runtime. While the background
    /// loop runs it applies completions itself; otherwise they are applied
    /// here first.
    pub fn pulse(&self) -> TickOutcome {
        if let Some(rx) = lock(&self.completion_rx).as_mut() {
            self.apply_pending(rx);
        }
        self.tick(Instant::now())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Start the sampler, the throttle gate and the pulse loop.
    /// A no-op while already running.
    pub fn start(self: &Arc<Self>) {
        let mut running = lock(&self.running);
        if running.is_some() {
            debug!("pulse scheduler already running");
            return;
        }
        let Some(completions) = lock(&self.completion_rx).take() else {
            warn!("completion channel unavailable, pulse loop not started");
            return;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.sampler.start(self.sampler.config().interval());
        let gate = tokio::spawn(
            self.gate
                .clone()
                .run(self.sampler.clone(), shutdown_rx.clone()),
        );
        let pulse = tokio::spawn(self.clone().run_pulse_loop(completions, shutdown_rx));

        *running = Some(LoopSlot {
            handles: vec![gate, pulse],
            shutdown_tx,
        });

        let config = self.config();
        info!(
            min_interval_ms = config.min_pulse_interval_ms,
            max_interval_ms = config.max_pulse_interval_ms,
            cooldown_ms = config.cooldown_ms,
            "pulse scheduler started"
        );
    }

    /// Stop the pulse loop, the gate and the sampler. In-flight
    /// executions keep running and are applied by later pulses.
    pub async fn stop(&self) {
        let slot = lock(&self.running).take();
        let Some(slot) = slot else {
            return;
        };
        let _ = slot.shutdown_tx.send(true);
        self.sampler.stop();
        for handle in slot.handles {
            let _ = handle.await;
        }
        info!("pulse scheduler stopped");
    }

    async fn run_pulse_loop(
        self: Arc<Self>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut next_pulse = Instant::now();

        loop {
            let throttled = self.gate.is_throttled();
            tokio::select! {
                _ = sleep_until(next_pulse) => {
                    self.apply_pending(&mut completions);
                    let outcome = self.tick(Instant::now());
                    next_pulse = Instant::now() + outcome.interval;
                }
                _ = self.gate.wait_until_clear(), if throttled => {
                    debug!("throttle released, pulsing early");
                    self.apply_pending(&mut completions);
                    let outcome = self.tick(Instant::now());
                    next_pulse = Instant::now() + outcome.interval;
                }
                Some(completion) = completions.recv() => {
                    self.apply_completion(completion);
                }
                _ = shutdown.changed() => {
                    debug!("pulse loop shutting down");
                    break;
                }
            }
        }

        *lock(&self.completion_rx) = Some(completions);
    }

    fn apply_pending(&self, rx: &mut mpsc::UnboundedReceiver<Completion>) {
        while let Ok(completion) = rx.try_recv() {
            self.apply_completion(completion);
        }
    }

    fn apply_completion(&self, completion: Completion) {
        let cooldown = self.config().cooldown();
        let duration = completion
            .finished_at
            .saturating_duration_since(completion.started_at);
        let duration_ms = duration.as_millis() as u64;
        let failed = completion.outcome.is_err();

        {
            let mut state = lock(&self.state);
            state.pool.release(
                &completion.worker_id,
                duration,
                failed,
                completion.finished_at,
                cooldown,
            );
            state.in_flight = state.in_flight.saturating_sub(1);
            if failed {
                state.counters.failed += 1;
            } else {
                state.counters.completed += 1;
            }
        }

        let Completion {
            task_id, worker_id, ..
        } = completion;
        match completion.outcome {
            Ok(()) => {
                debug!(%task_id, %worker_id, duration_ms, "task completed");
                self.events.emit(PulseEvent::TaskCompleted {
                    task_id,
                    worker_id,
                    duration_ms,
                });
            }
            Err(error) => {
                warn!(%task_id, %worker_id, duration_ms, %error, "task failed");
                self.events.emit(PulseEvent::TaskFailed {
                    task_id,
                    worker_id,
                    duration_ms,
                    error,
                });
            }
        }
    }

    fn tick(&self, now: Instant) -> TickOutcome {
        let config = self.config();
        let throttled = self.gate.is_throttled();
        let snapshot = self.sampler.latest();
        let mut outcome = TickOutcome {
            throttled,
            ..TickOutcome::default()
        };
        let mut dispatches = Vec::new();

        let metrics = {
            let mut state = lock(&self.state);

            if throttled {
                let shed = state.queue.shed_below(Priority::High);
                outcome.shed = shed.len();
                state.counters.shed += shed.len() as u64;
            } else {
                let ready = state.pool.ready(now);
                let cap = config
                    .max_concurrent_dispatches_per_tick
                    .unwrap_or(state.pool.len());
                let n = state.queue.len().min(ready.len()).min(cap);

                for worker_id in ready.into_iter().take(n) {
                    let Some(task) = state.queue.pop() else {
                        break;
                    };
                    state.pool.claim(&worker_id, now);
                    state.in_flight += 1;
                    state.counters.dispatched += 1;
                    dispatches.push((worker_id, task));
                }
            }

            let interval = pulse_interval(
                &config,
                snapshot.as_ref(),
                state.queue.len(),
                state.queue.has_urgent(),
            );
            state.interval = interval;
            outcome.interval = interval;

            PulseMetrics {
                cpu_percent: snapshot.as_ref().map_or(0.0, |s| s.cpu_percent),
                memory_percent: snapshot.as_ref().map_or(0.0, |s| s.memory_percent),
                load_average_1m: snapshot.as_ref().map_or(0.0, |s| s.load_1m()),
                active_workers: state.pool.busy_count(),
                queue_depth: state.queue.len(),
                interval_ms: interval.as_millis() as u64,
            }
        };

        if outcome.shed > 0 {
            info!(count = outcome.shed, "shed low-priority tasks while throttled");
            self.events.emit(PulseEvent::TasksShed {
                count: outcome.shed,
            });
        }

        for (worker_id, task) in dispatches {
            outcome.dispatched.push((task.id, worker_id.clone()));
            self.dispatch(worker_id, task, now);
        }

        debug!(
            throttled,
            dispatched = outcome.dispatched.len(),
            queue_depth = metrics.queue_depth,
            interval_ms = metrics.interval_ms,
            "pulse"
        );
        self.events.emit(PulseEvent::MetricsUpdated(metrics));
        outcome
    }

    fn dispatch(&self, worker_id: WorkerId, task: Task, started_at: Instant) {
        let Task {
            id: task_id,
            priority,
            payload,
            enqueued_at,
        } = task;
        debug!(
            %task_id,
            %worker_id,
            %priority,
            waited_ms = started_at.saturating_duration_since(enqueued_at).as_millis() as u64,
            "task dispatched"
        );
        self.events.emit(PulseEvent::TaskDispatched {
            task_id,
            worker_id: worker_id.clone(),
        });

        let executor = self.executor.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            // The executor runs on its own task so a panic surfaces as a
            // JoinError instead of taking the worker with it.
            let run = {
                let worker_id = worker_id.clone();
                tokio::spawn(async move { executor(worker_id, payload).await })
            };
            let outcome = match run.await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(e) if e.is_panic() => Err("executor panicked".to_string()),
                Err(e) => Err(format!("executor task aborted: {e}")),
            };
            let _ = tx.send(Completion {
                task_id,
                worker_id,
                started_at,
                finished_at: Instant::now(),
                outcome,
            });
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
