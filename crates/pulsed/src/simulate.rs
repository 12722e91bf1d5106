//! Simulated workload for `pulsed run`.
//!
//! Payloads carry a `work_ms` duration the executor sleeps for. Priorities
//! cycle through all four levels and every seventh task fails on purpose,
//! so shedding and failure paths show up in a short run.

use std::time::Duration;

use serde_json::{Value, json};

use pulse_core::Priority;
use pulse_scheduler::{Executor, executor_fn};

/// Executor that sleeps for the payload's `work_ms` and fails on `fail`.
pub fn simulated_executor() -> Executor {
    executor_fn(|worker_id, payload: Value| async move {
        let work_ms = payload["work_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(work_ms)).await;
        if payload["fail"].as_bool().unwrap_or(false) {
            anyhow::bail!("simulated failure on {worker_id}");
        }
        Ok(json!({ "worker_id": worker_id, "work_ms": work_ms }))
    })
}

/// `count` tasks with deterministic durations between 100 and 500 ms.
pub fn workload(count: usize) -> impl Iterator<Item = (Priority, Value)> {
    (0..count).map(|i| {
        let priority = Priority::ALL[i % Priority::ALL.len()];
        let payload = json!({
            "seq": i,
            "work_ms": 100 + (i as u64 * 73) % 400,
            "fail": i % 7 == 6,
        });
        (priority, payload)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_cycles_priorities() {
        let priorities: Vec<Priority> = workload(5).map(|(p, _)| p).collect();
        assert_eq!(
            priorities,
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Medium,
                Priority::Low,
                Priority::Critical,
            ]
        );
    }

    #[test]
    fn every_seventh_task_fails() {
        let failing: Vec<u64> = workload(21)
            .filter(|(_, p)| p["fail"] == true)
            .map(|(_, p)| p["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(failing, vec![6, 13, 20]);
    }

    #[test]
    fn durations_stay_in_range() {
        assert!(workload(100).all(|(_, p)| {
            let ms = p["work_ms"].as_u64().unwrap();
            (100..500).contains(&ms)
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn executor_sleeps_and_reports() {
        let exec = simulated_executor();
        let started = tokio::time::Instant::now();
        let out = exec("w1".into(), json!({ "work_ms": 250 })).await.unwrap();
        assert_eq!(out["worker_id"], "w1");
        assert!(started.elapsed() >= Duration::from_millis(250));

        let err = exec("w2".into(), json!({ "fail": true })).await.unwrap_err();
        assert!(err.to_string().contains("w2"));
    }
}
