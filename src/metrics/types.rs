use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stages::Stage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureOutcomeKind {
    Changed,
    Unchanged,
    Discarded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetrics {
    pub timestamp: DateTime<Utc>,
    pub display: String,
    pub capture_ms: u64,
    pub fingerprint_ms: Option<u64>,
    pub frame_bytes: usize,
    pub outcome: CaptureOutcomeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetrics {
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub duration_ms: u64,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_captures: Vec<CaptureMetrics>,
    pub recent_stage_calls: Vec<StageMetrics>,
    pub capture_count: u64,
    pub changed_count: u64,
    pub unchanged_count: u64,
    pub capture_failure_count: u64,
    pub stage_call_count: u64,
    pub stage_failure_count: u64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            system: SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
            recent_captures: Vec::new(),
            recent_stage_calls: Vec::new(),
            capture_count: 0,
            changed_count: 0,
            unchanged_count: 0,
            capture_failure_count: 0,
            stage_call_count: 0,
            stage_failure_count: 0,
        }
    }
}
