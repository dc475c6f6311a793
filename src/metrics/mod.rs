mod types;

pub use types::{MetricsSnapshot, SystemMetrics, TickMetrics, TickOutcome};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_TICKS: usize = 50;

/// Process-wide tick statistics shared by every stream.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_ticks: Vec<TickMetrics>,
    tick_count: u64,
    estimate_count: u64,
    reuse_count: u64,
    idle_count: u64,
    error_count: u64,
    store_failure_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // Initial refresh to establish baseline for CPU calculation
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_ticks: Vec::with_capacity(MAX_RECENT_TICKS),
                tick_count: 0,
                estimate_count: 0,
                reuse_count: 0,
                idle_count: 0,
                error_count: 0,
                store_failure_count: 0,
                system,
                pid,
            })),
        }
    }

    pub async fn record_tick(&self, metrics: TickMetrics) {
        let mut state = self.inner.lock().await;

        state.tick_count += 1;
        match metrics.outcome {
            TickOutcome::Estimated => state.estimate_count += 1,
            TickOutcome::Reused => state.reuse_count += 1,
            TickOutcome::Idle => state.idle_count += 1,
            TickOutcome::FrameError | TickOutcome::EstimatorError => state.error_count += 1,
        }
        if metrics.store_failed {
            state.store_failure_count += 1;
        }

        state.recent_ticks.push(metrics);
        if state.recent_ticks.len() > MAX_RECENT_TICKS {
            state.recent_ticks.remove(0);
        }
    }

    pub async fn get_snapshot(&self, active_streams: usize) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let (cpu_percent, memory_mb) = sample(&mut state);

        MetricsSnapshot {
            system: SystemMetrics {
                cpu_percent,
                memory_mb,
            },
            recent_ticks: state.recent_ticks.clone(),
            tick_count: state.tick_count,
            estimate_count: state.estimate_count,
            reuse_count: state.reuse_count,
            idle_count: state.idle_count,
            error_count: state.error_count,
            store_failure_count: state.store_failure_count,
            active_streams,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// CPU percentage and resident memory in MiB for this process. Only sampled
/// when a snapshot is taken, so the CPU figure covers the time since the
/// previous snapshot.
fn sample(state: &mut MetricsState) -> (f32, f64) {
    let pid = state.pid;
    state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

    match state.system.process(pid) {
        Some(process) => (
            process.cpu_usage(),
            process.memory() as f64 / 1024.0 / 1024.0,
        ),
        None => (0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tick(outcome: TickOutcome, store_failed: bool) -> TickMetrics {
        TickMetrics {
            timestamp: Utc::now(),
            session_id: "s".into(),
            outcome,
            decode_ms: 1,
            estimate_ms: 1,
            store_ms: 1,
            store_failed,
            total_ms: 2,
        }
    }

    #[tokio::test]
    async fn counts_outcomes_and_bounds_window() {
        let metrics = MetricsCollector::new();
        for _ in 0..MAX_RECENT_TICKS {
            metrics.record_tick(tick(TickOutcome::Estimated, false)).await;
        }
        metrics.record_tick(tick(TickOutcome::FrameError, true)).await;
        metrics.record_tick(tick(TickOutcome::Idle, false)).await;

        let snapshot = metrics.get_snapshot(3).await;
        assert_eq!(snapshot.tick_count, MAX_RECENT_TICKS as u64 + 2);
        assert_eq!(snapshot.estimate_count, MAX_RECENT_TICKS as u64);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.idle_count, 1);
        assert_eq!(snapshot.store_failure_count, 1);
        assert_eq!(snapshot.recent_ticks.len(), MAX_RECENT_TICKS);
        assert_eq!(snapshot.active_streams, 3);
    }

    #[tokio::test]
    async fn snapshot_samples_process_stats() {
        let metrics = MetricsCollector::new();
        metrics.record_tick(tick(TickOutcome::Idle, false)).await;
        let snapshot = metrics.get_snapshot(0).await;
        assert!(snapshot.system.memory_mb > 0.0);
        assert!(snapshot.system.cpu_percent >= 0.0);
    }
}
