//! Prometheus text exposition format.
//!
//! Renders a [`SchedulerStatus`] into the Prometheus text exposition
//! format for scraping or for dumping on shutdown.

use std::fmt::Write;

use pulse_core::Priority;

use crate::status::SchedulerStatus;

/// Render scheduler status into Prometheus text format.
///
/// Queue gauges carry a `priority` label, worker series a `worker` label.
pub fn render_prometheus(status: &SchedulerStatus) -> String {
    let mut out = String::new();

    header(&mut out, "pulse_queue_depth", "Queued tasks per priority.", "gauge");
    for priority in Priority::ALL {
        line(
            &mut out,
            &format!("pulse_queue_depth{{priority=\"{priority}\"}}"),
            status.queue.get(priority),
        );
    }

    header(&mut out, "pulse_interval_ms", "Delay until the next pulse in milliseconds.", "gauge");
    line(&mut out, "pulse_interval_ms", status.interval_ms);

    header(&mut out, "pulse_throttled", "1 while dispatch is throttled.", "gauge");
    line(&mut out, "pulse_throttled", u8::from(status.throttled));

    header(&mut out, "pulse_throttle_total", "Throttle activations.", "counter");
    line(&mut out, "pulse_throttle_total", status.throttle_count);

    header(&mut out, "pulse_tasks_in_flight", "Dispatched tasks still executing.", "gauge");
    line(&mut out, "pulse_tasks_in_flight", status.in_flight);

    let counters = [
        ("submitted", status.tasks.submitted),
        ("dispatched", status.tasks.dispatched),
        ("completed", status.tasks.completed),
        ("failed", status.tasks.failed),
        ("shed", status.tasks.shed),
    ];
    header(&mut out, "pulse_tasks_total", "Tasks by outcome.", "counter");
    for (outcome, value) in counters {
        line(&mut out, &format!("pulse_tasks_total{{outcome=\"{outcome}\"}}"), value);
    }

    header(&mut out, "pulse_worker_available", "1 when the worker can take a task.", "gauge");
    for w in &status.workers {
        line(
            &mut out,
            &format!("pulse_worker_available{{worker=\"{}\"}}", w.worker_id),
            u8::from(w.available),
        );
    }

    header(&mut out, "pulse_worker_cooldown_ms", "Remaining worker cooldown in milliseconds.", "gauge");
    for w in &status.workers {
        line(
            &mut out,
            &format!("pulse_worker_cooldown_ms{{worker=\"{}\"}}", w.worker_id),
            w.cooldown_remaining_ms,
        );
    }

    header(&mut out, "pulse_worker_executions_total", "Executions per worker.", "counter");
    for w in &status.workers {
        line(
            &mut out,
            &format!("pulse_worker_executions_total{{worker=\"{}\"}}", w.worker_id),
            w.execution_count,
        );
    }

    header(&mut out, "pulse_worker_failures_total", "Failed executions per worker.", "counter");
    for w in &status.workers {
        line(
            &mut out,
            &format!("pulse_worker_failures_total{{worker=\"{}\"}}", w.worker_id),
            w.failure_count,
        );
    }

    header(&mut out, "pulse_worker_avg_execution_ms", "Mean execution time per worker.", "gauge");
    for w in &status.workers {
        line(
            &mut out,
            &format!("pulse_worker_avg_execution_ms{{worker=\"{}\"}}", w.worker_id),
            format_args!("{:.2}", w.average_execution_time_ms),
        );
    }

    if let Some(r) = &status.resources {
        header(&mut out, "pulse_cpu_percent", "Smoothed host CPU utilization.", "gauge");
        line(&mut out, "pulse_cpu_percent", format_args!("{:.2}", r.cpu_percent));

        header(&mut out, "pulse_memory_percent", "Host memory utilization.", "gauge");
        line(&mut out, "pulse_memory_percent", format_args!("{:.2}", r.memory_percent));

        header(&mut out, "pulse_load_average_1m", "One-minute host load average.", "gauge");
        line(&mut out, "pulse_load_average_1m", format_args!("{:.2}", r.load_1m()));
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn line(out: &mut String, series: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{series} {value}");
}
