use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    Estimated,
    /// Frame matched the previous fingerprint; previous estimate reused.
    Reused,
    /// No fresh frame arrived within the wait window.
    Idle,
    FrameError,
    EstimatorError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickMetrics {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub outcome: TickOutcome,
    pub decode_ms: u64,
    pub estimate_ms: u64,
    pub store_ms: u64,
    pub store_failed: bool,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_ticks: Vec<TickMetrics>,
    pub tick_count: u64,
    pub estimate_count: u64,
    pub reuse_count: u64,
    pub idle_count: u64,
    pub error_count: u64,
    pub store_failure_count: u64,
    pub active_streams: usize,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            system: SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
            recent_ticks: Vec::new(),
            tick_count: 0,
            estimate_count: 0,
            reuse_count: 0,
            idle_count: 0,
            error_count: 0,
            store_failure_count: 0,
            active_streams: 0,
        }
    }
}
