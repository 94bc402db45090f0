use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{Duration, Instant};

use crate::error::{AgentError, AgentResult};
use crate::metrics::{CaptureMetrics, CaptureOutcomeKind, MetricsCollector};
use crate::models::{DisplayId, Frame};

use super::capturer::ScreenCapturer;
use super::change_detector::{compare, ChangeFingerprint};
use super::scheduler::{ScheduledTick, Scheduler, TickCallback};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 10;
const FAILURE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// New content; the frame was published.
    Changed(Frame),
    Unchanged,
    /// Captured from a display that stopped being the target mid-capture.
    Discarded,
}

impl CaptureOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, CaptureOutcome::Changed(_))
    }
}

/// Transient capture problem. Polling keeps going after one of these.
#[derive(Debug, Clone)]
pub struct CaptureFailure {
    pub display: DisplayId,
    pub message: String,
    pub consecutive: u32,
    pub at: DateTime<Utc>,
}

struct CaptureState {
    polling: Option<ScheduledTick>,
    current_target: DisplayId,
    last_fingerprint: Option<ChangeFingerprint>,
    consecutive_failures: u32,
}

struct CaptureInner {
    capturer: Arc<dyn ScreenCapturer>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<CaptureState>,
    frames: watch::Sender<Option<Frame>>,
    failures: broadcast::Sender<CaptureFailure>,
    metrics: MetricsCollector,
    capture_timeout: Duration,
}

impl Drop for CaptureInner {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().polling.take() {
            handle.cancel();
        }
    }
}

/// Polls one display, dedups frames by exact fingerprint, and keeps only the latest
/// changed frame for consumers.
#[derive(Clone)]
pub struct CaptureSource {
    inner: Arc<CaptureInner>,
}

impl CaptureSource {
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        scheduler: Arc<dyn Scheduler>,
        target: DisplayId,
        metrics: MetricsCollector,
    ) -> Self {
        Self::with_capture_timeout(
            capturer,
            scheduler,
            target,
            metrics,
            Duration::from_secs(DEFAULT_CAPTURE_TIMEOUT_SECS),
        )
    }

    pub fn with_capture_timeout(
        capturer: Arc<dyn ScreenCapturer>,
        scheduler: Arc<dyn Scheduler>,
        target: DisplayId,
        metrics: MetricsCollector,
        capture_timeout: Duration,
    ) -> Self {
        let (frames, _) = watch::channel(None);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(CaptureInner {
                capturer,
                scheduler,
                state: Mutex::new(CaptureState {
                    polling: None,
                    current_target: target,
                    last_fingerprint: None,
                    consecutive_failures: 0,
                }),
                frames,
                failures,
                metrics,
                capture_timeout,
            }),
        }
    }

    pub async fn request_permission(&self) -> bool {
        let granted = self.inner.capturer.request_permission().await;
        if !granted {
            log_warn!("screen capture permission denied");
        }
        granted
    }

    pub async fn is_polling(&self) -> bool {
        self.inner.state.lock().await.polling.is_some()
    }

    pub async fn current_target(&self) -> DisplayId {
        self.inner.state.lock().await.current_target.clone()
    }

    /// Latest-only slot; a slow reader simply sees the newest frame next time it looks.
    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Frame>> {
        self.inner.frames.subscribe()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.inner.frames.borrow().clone()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<CaptureFailure> {
        self.inner.failures.subscribe()
    }

    /// Starts the repeating capture and runs one capture right away. A second call while
    /// polling is a no-op.
    pub async fn start_polling(&self, interval: Duration) {
        {
            let mut state = self.inner.state.lock().await;
            if state.polling.is_some() {
                return;
            }

            let weak = Arc::downgrade(&self.inner);
            let handle = self
                .inner
                .scheduler
                .schedule_repeating(interval, tick_callback(weak));
            state.polling = Some(handle);
            log_info!(
                "capture polling started on {} every {:?}",
                state.current_target,
                interval
            );
        }

        // Failures are already logged and published.
        let _ = self.capture_once().await;
    }

    pub async fn stop_polling(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(handle) = state.polling.take() {
            handle.cancel();
            log_info!("capture polling stopped");
        }
    }

    /// Points capture at another display. The dedup reference is dropped so the first
    /// frame from the new display always counts as changed, then one capture runs
    /// immediately.
    pub async fn update_target(&self, display: DisplayId) {
        {
            let mut state = self.inner.state.lock().await;
            if state.current_target == display {
                return;
            }
            log_info!(
                "capture target switched from {} to {}",
                state.current_target,
                display
            );
            state.current_target = display;
            state.last_fingerprint = None;
            state.consecutive_failures = 0;
        }
        self.inner.frames.send_replace(None);

        let _ = self.capture_once().await;
    }

    pub async fn capture_once(&self) -> AgentResult<CaptureOutcome> {
        let target = self.current_target().await;
        let started = Instant::now();

        let captured = tokio::time::timeout(
            self.inner.capture_timeout,
            self.inner.capturer.capture(&target),
        )
        .await;

        let frame = match captured {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                return Err(self.record_failure(target, format!("{err:#}"), started).await);
            }
            Err(_) => {
                let message = format!(
                    "capture timed out after {}s",
                    self.inner.capture_timeout.as_secs()
                );
                return Err(self.record_failure(target, message, started).await);
            }
        };
        let capture_ms = started.elapsed().as_millis() as u64;

        let fingerprint_started = Instant::now();
        let fingerprint = tokio::task::spawn_blocking({
            let frame = frame.clone();
            move || ChangeFingerprint::of(&frame)
        })
        .await;
        let fingerprint = match fingerprint {
            Ok(Ok(fp)) => fp,
            Ok(Err(err)) => {
                return Err(self.record_failure(target, format!("{err:#}"), started).await);
            }
            Err(err) => {
                let message = format!("fingerprint worker join failed: {err}");
                return Err(self.record_failure(target, message, started).await);
            }
        };
        let fingerprint_ms = fingerprint_started.elapsed().as_millis() as u64;

        let outcome = {
            let mut state = self.inner.state.lock().await;
            if state.current_target != target {
                log_debug!("dropping frame from {} after target switch", target);
                CaptureOutcome::Discarded
            } else {
                state.consecutive_failures = 0;
                let decision = compare(fingerprint, state.last_fingerprint.as_ref());
                if decision.changed {
                    state.last_fingerprint = Some(decision.fingerprint);
                    CaptureOutcome::Changed(frame.clone())
                } else {
                    CaptureOutcome::Unchanged
                }
            }
        };

        if let CaptureOutcome::Changed(frame) = &outcome {
            self.inner.frames.send_replace(Some(frame.clone()));
            log_debug!(
                "frame accepted from {} ({}x{}, capture={}ms, fingerprint={}ms)",
                target,
                frame.width(),
                frame.height(),
                capture_ms,
                fingerprint_ms
            );
        }

        self.inner
            .metrics
            .record_capture(CaptureMetrics {
                timestamp: Utc::now(),
                display: target.to_string(),
                capture_ms,
                fingerprint_ms: Some(fingerprint_ms),
                frame_bytes: frame.byte_len(),
                outcome: match outcome {
                    CaptureOutcome::Changed(_) => CaptureOutcomeKind::Changed,
                    CaptureOutcome::Unchanged => CaptureOutcomeKind::Unchanged,
                    CaptureOutcome::Discarded => CaptureOutcomeKind::Discarded,
                },
            })
            .await;

        Ok(outcome)
    }

    async fn record_failure(
        &self,
        display: DisplayId,
        message: String,
        started: Instant,
    ) -> AgentError {
        let consecutive = {
            let mut state = self.inner.state.lock().await;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.consecutive_failures
        };

        log_warn!(
            "capture failed on {} ({} in a row): {}",
            display,
            consecutive,
            message
        );

        self.inner
            .metrics
            .record_capture(CaptureMetrics {
                timestamp: Utc::now(),
                display: display.to_string(),
                capture_ms: started.elapsed().as_millis() as u64,
                fingerprint_ms: None,
                frame_bytes: 0,
                outcome: CaptureOutcomeKind::Failed,
            })
            .await;

        let _ = self.inner.failures.send(CaptureFailure {
            display,
            message: message.clone(),
            consecutive,
            at: Utc::now(),
        });

        AgentError::Capture(message)
    }
}

fn tick_callback(inner: Weak<CaptureInner>) -> TickCallback {
    Arc::new(move || {
        let inner = inner.clone();
        Box::pin(async move {
            if let Some(inner) = inner.upgrade() {
                let source = CaptureSource { inner };
                let _ = source.capture_once().await;
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensing::ManualScheduler;
    use crate::testing::{solid_frame, ScriptedCapturer};

    fn source_with(
        capturer: Arc<ScriptedCapturer>,
        scheduler: ManualScheduler,
    ) -> (CaptureSource, MetricsCollector) {
        let metrics = MetricsCollector::new();
        let source = CaptureSource::new(
            capturer,
            Arc::new(scheduler),
            DisplayId::main(),
            metrics.clone(),
        );
        (source, metrics)
    }

    #[tokio::test]
    async fn start_polling_captures_immediately_and_only_once() {
        let capturer = Arc::new(ScriptedCapturer::new());
        capturer.set_screen(solid_frame("main", 4, 4, [1, 1, 1, 255]));
        let scheduler = ManualScheduler::new();
        let (source, _) = source_with(capturer.clone(), scheduler.clone());

        source.start_polling(Duration::from_secs(2)).await;
        source.start_polling(Duration::from_secs(9)).await;

        assert!(source.is_polling().await);
        assert_eq!(capturer.capture_calls(), 1);
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.intervals(), vec![Duration::from_secs(2)]);
        assert!(source.latest_frame().is_some());
    }

    #[tokio::test]
    async fn dropping_the_source_cancels_polling() {
        let capturer = Arc::new(ScriptedCapturer::new());
        capturer.set_screen(solid_frame("main", 4, 4, [1, 1, 1, 255]));
        let scheduler = ManualScheduler::new();
        let (source, _) = source_with(capturer.clone(), scheduler.clone());

        source.start_polling(Duration::from_secs(2)).await;
        assert_eq!(scheduler.active_count(), 1);

        drop(source);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.tick().await, 0);
        assert_eq!(capturer.capture_calls(), 1);
    }

    #[tokio::test]
    async fn unchanged_frames_are_not_published() {
        let capturer = Arc::new(ScriptedCapturer::new());
        capturer.set_screen(solid_frame("main", 4, 4, [1, 1, 1, 255]));
        let (source, metrics) = source_with(capturer.clone(), ManualScheduler::new());

        let mut frames = source.subscribe_frames();
        assert!(source.capture_once().await.unwrap().is_changed());
        assert!(frames.has_changed().unwrap());
        frames.borrow_and_update();

        assert!(matches!(
            source.capture_once().await.unwrap(),
            CaptureOutcome::Unchanged
        ));
        assert!(!frames.has_changed().unwrap());

        let snapshot = metrics.get_snapshot().await;
        assert_eq!(snapshot.changed_count, 1);
        assert_eq!(snapshot.unchanged_count, 1);
    }

    #[tokio::test]
    async fn target_switch_resets_dedup() {
        let capturer = Arc::new(ScriptedCapturer::new());
        let pixels = [7, 7, 7, 255];
        capturer.set_screen(solid_frame("main", 4, 4, pixels));
        capturer.set_screen(solid_frame("external", 4, 4, pixels));
        let (source, _) = source_with(capturer.clone(), ManualScheduler::new());

        assert!(source.capture_once().await.unwrap().is_changed());
        assert!(!source.capture_once().await.unwrap().is_changed());

        source.update_target(DisplayId::new("external")).await;
        assert_eq!(capturer.capture_calls(), 3);
        assert_eq!(
            capturer.requested_displays().last(),
            Some(&DisplayId::new("external"))
        );
        let latest = source.latest_frame().expect("switch capture publishes");
        assert_eq!(latest.display(), &DisplayId::new("external"));

        // Same display again is a no-op.
        source.update_target(DisplayId::new("external")).await;
        assert_eq!(capturer.capture_calls(), 3);
    }

    #[tokio::test]
    async fn transient_failures_do_not_stop_polling() {
        let capturer = Arc::new(ScriptedCapturer::new());
        capturer.set_screen(solid_frame("main", 4, 4, [0, 0, 0, 255]));
        let scheduler = ManualScheduler::new();
        let (source, metrics) = source_with(capturer.clone(), scheduler.clone());
        let mut failures = source.subscribe_failures();

        source.start_polling(Duration::from_secs(1)).await;
        let first = source.latest_frame().unwrap();

        capturer.fail_next(3);
        capturer.set_screen(solid_frame("main", 4, 4, [255, 0, 0, 255]));
        for expected in 1..=3 {
            scheduler.tick().await;
            assert!(source.is_polling().await);
            let failure = failures.recv().await.unwrap();
            assert_eq!(failure.consecutive, expected);
        }
        assert_eq!(source.latest_frame().unwrap().pixels(), first.pixels());

        scheduler.tick().await;
        let recovered = source.latest_frame().unwrap();
        assert_eq!(&recovered.pixels()[..4], &[255, 0, 0, 255]);
        assert_eq!(metrics.get_snapshot().await.capture_failure_count, 3);
    }

    #[tokio::test]
    async fn stop_polling_is_idempotent() {
        let capturer = Arc::new(ScriptedCapturer::new());
        capturer.set_screen(solid_frame("main", 2, 2, [0, 0, 0, 255]));
        let scheduler = ManualScheduler::new();
        let (source, _) = source_with(capturer.clone(), scheduler.clone());

        source.start_polling(Duration::from_secs(1)).await;
        source.stop_polling().await;
        source.stop_polling().await;

        assert!(!source.is_polling().await);
        assert_eq!(scheduler.tick().await, 0);
        assert_eq!(capturer.capture_calls(), 1);
    }

    #[tokio::test]
    async fn denied_permission_has_no_side_effects() {
        let capturer = Arc::new(ScriptedCapturer::new());
        capturer.set_permission(false);
        let (source, _) = source_with(capturer.clone(), ManualScheduler::new());

        assert!(!source.request_permission().await);
        assert!(!source.is_polling().await);
        assert_eq!(capturer.capture_calls(), 0);
    }
}
