mod types;

pub use types::{CaptureMetrics, CaptureOutcomeKind, MetricsSnapshot, StageMetrics, SystemMetrics};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_ENTRIES: usize = 20;

/// Counters for the capture gate and the model stages, shared by clone.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_captures: Vec<CaptureMetrics>,
    recent_stage_calls: Vec<StageMetrics>,
    capture_count: u64,
    changed_count: u64,
    unchanged_count: u64,
    capture_failure_count: u64,
    stage_call_count: u64,
    stage_failure_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes, so take a baseline now
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_captures: Vec::with_capacity(MAX_RECENT_ENTRIES),
                recent_stage_calls: Vec::with_capacity(MAX_RECENT_ENTRIES),
                capture_count: 0,
                changed_count: 0,
                unchanged_count: 0,
                capture_failure_count: 0,
                stage_call_count: 0,
                stage_failure_count: 0,
                system,
                pid,
            })),
        }
    }

    pub async fn record_capture(&self, metrics: CaptureMetrics) {
        let mut state = self.inner.lock().await;

        state.capture_count += 1;
        match metrics.outcome {
            CaptureOutcomeKind::Changed => state.changed_count += 1,
            CaptureOutcomeKind::Unchanged => state.unchanged_count += 1,
            CaptureOutcomeKind::Failed => state.capture_failure_count += 1,
            CaptureOutcomeKind::Discarded => {}
        }

        push_bounded(&mut state.recent_captures, metrics);
    }

    pub async fn record_stage(&self, metrics: StageMetrics) {
        let mut state = self.inner.lock().await;

        state.stage_call_count += 1;
        if !metrics.succeeded {
            state.stage_failure_count += 1;
        }

        push_bounded(&mut state.recent_stage_calls, metrics);
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;

        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system_metrics = if let Some(process) = state.system.process(pid) {
            SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            }
        } else {
            SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            }
        };

        MetricsSnapshot {
            system: system_metrics,
            recent_captures: state.recent_captures.clone(),
            recent_stage_calls: state.recent_stage_calls.clone(),
            capture_count: state.capture_count,
            changed_count: state.changed_count,
            unchanged_count: state.unchanged_count,
            capture_failure_count: state.capture_failure_count,
            stage_call_count: state.stage_call_count,
            stage_failure_count: state.stage_failure_count,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.recent_captures.clear();
        state.recent_stage_calls.clear();
        state.capture_count = 0;
        state.changed_count = 0;
        state.unchanged_count = 0;
        state.capture_failure_count = 0;
        state.stage_call_count = 0;
        state.stage_failure_count = 0;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn push_bounded<T>(entries: &mut Vec<T>, entry: T) {
    entries.push(entry);
    if entries.len() > MAX_RECENT_ENTRIES {
        entries.remove(0);
    }
}
