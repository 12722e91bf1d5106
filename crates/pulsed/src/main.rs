//! pulsed — the pulse scheduler daemon.
//!
//! Single binary that assembles every pulse subsystem:
//! - Resource sampler (sysinfo)
//! - Throttle gate
//! - Pulse scheduler with a simulated executor
//!
//! # Usage
//!
//! ```text
//! pulsed sample --count 5 --interval-ms 1000
//! pulsed run --config pulse.toml --workers 4 --tasks 40
//! ```

mod simulate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulse_core::{EventBus, PulseConfig, PulseEvent};
use pulse_metrics::ResourceSampler;
use pulse_scheduler::{PulseScheduler, render_prometheus};

#[derive(Parser)]
#[command(name = "pulsed", about = "Adaptive pulse scheduler daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Print host resource snapshots and alerts.
    Sample {
        /// Number of snapshots to take.
        #[arg(long, default_value = "5")]
        count: usize,

        /// Delay between snapshots in milliseconds.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Run the sampler, throttle gate and scheduler on a simulated workload.
    Run {
        /// TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of workers to register.
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Number of tasks to submit.
        #[arg(long, default_value = "40")]
        tasks: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Sample { count, interval_ms } => {
            run_sample(count, Duration::from_millis(interval_ms)).await
        }
        Command::Run {
            config,
            workers,
            tasks,
        } => run_pipeline(config, workers, tasks).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pulsed=debug,pulse=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_sample(count: usize, interval: Duration) -> anyhow::Result<()> {
    let config = PulseConfig::default();
    let events = EventBus::default();
    let mut alerts = events.subscribe();
    let sampler = ResourceSampler::with_system(config.sampler, events);

    for i in 0..count {
        if i > 0 {
            tokio::time::sleep(interval).await;
        }
        match sampler.sample() {
            Ok(snapshot) => println!("{}", serde_json::to_string(&snapshot)?),
            Err(e) => warn!(error = %e, "sample failed"),
        }
        while let Ok(PulseEvent::ResourceAlert(alert)) = alerts.try_recv() {
            println!("{}", serde_json::to_string(&alert)?);
        }
    }

    println!("{}", serde_json::to_string(&sampler.summary())?);
    for hint in sampler.recommendations() {
        println!("recommendation: {hint}");
    }
    Ok(())
}

async fn run_pipeline(
    config_path: Option<PathBuf>,
    workers: usize,
    tasks: usize,
) -> anyhow::Result<()> {
    let config = match &config_path {
        Some(path) => PulseConfig::from_file(path)?,
        None => PulseConfig::default(),
    };
    info!(config = ?config_path, workers, tasks, "pulsed starting");

    // ── Assemble subsystems ────────────────────────────────────

    let events = EventBus::default();
    let sampler = Arc::new(ResourceSampler::with_system(config.sampler, events.clone()));
    let scheduler = Arc::new(PulseScheduler::new(
        config.scheduler,
        sampler,
        events.clone(),
        simulate::simulated_executor(),
    )?);

    for i in 1..=workers {
        scheduler.register_worker(format!("worker-{i}"))?;
    }
    for (priority, payload) in simulate::workload(tasks) {
        scheduler.submit(priority, payload);
    }

    // ── Event log ──────────────────────────────────────────────

    let mut rx = events.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(kind = event.kind(), %json, "event"),
                    Err(e) => warn!(error = %e, "failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── Run until the workload settles or Ctrl-C ───────────────

    scheduler.start();

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = scheduler.status();
                let t = status.tasks;
                if t.completed + t.failed + t.shed >= tasks as u64 {
                    info!(
                        completed = t.completed,
                        failed = t.failed,
                        shed = t.shed,
                        "workload settled"
                    );
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    scheduler.stop().await;
    event_log.abort();

    print!("{}", render_prometheus(&scheduler.status()));
    info!("pulsed stopped");
    Ok(())
}
