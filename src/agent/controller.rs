use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, AgentResult};
use crate::metrics::{MetricsCollector, StageMetrics};
use crate::models::{DisplayId, Frame, SessionContext};
use crate::sensing::{CaptureSource, Scheduler, ScreenCapturer};
use crate::settings::AgentSettings;
use crate::stages::{
    fallback_summary, CompletionWatcher, MilestonePlanner, MilestoneSummarizer, Stage,
    StepNavigator, VisionClient,
};

use super::state::{AgentSnapshot, AgentState, AgentStatus, SessionTicket, COMPLETED_INSTRUCTION};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Result of one driven request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Another stage call is outstanding; the request was ignored.
    Busy,
    /// Nothing to drive in this status.
    Inactive(AgentStatus),
    /// A fresh instruction for the milestone at this index is on screen.
    Instructed { milestone_index: usize },
    /// The navigator gave nothing actionable; the session did not move.
    NoStep,
    /// The watcher rejected the step; navigating the same milestone again.
    NotComplete { reasoning: String },
    /// The milestone at this index is done and the next one is active.
    MilestoneCompleted { completed_index: usize },
    /// Every milestone is done.
    Completed,
}

#[derive(Clone)]
struct Stages {
    planner: MilestonePlanner,
    navigator: StepNavigator,
    watcher: CompletionWatcher,
    summarizer: MilestoneSummarizer,
}

/// Owns the live session and sequences planner, navigator, watcher and summarizer
/// calls against it, one at a time.
#[derive(Clone)]
pub struct AgentController {
    state: Arc<Mutex<AgentState>>,
    stages: Stages,
    capture: CaptureSource,
    settings: AgentSettings,
    metrics: MetricsCollector,
    snapshots: Arc<watch::Sender<AgentSnapshot>>,
    driver: Arc<Mutex<Option<(JoinHandle<()>, CancellationToken)>>>,
}

impl AgentController {
    pub fn new(
        vision: Arc<dyn VisionClient>,
        capture: CaptureSource,
        settings: AgentSettings,
        metrics: MetricsCollector,
    ) -> Self {
        let stages = Stages {
            planner: MilestonePlanner::new(vision.clone())
                .with_max_milestones(settings.max_milestones),
            navigator: StepNavigator::new(vision.clone()),
            watcher: CompletionWatcher::new(vision.clone()),
            summarizer: MilestoneSummarizer::new(vision).with_word_limit(settings.summary_word_limit),
        };
        let (snapshots, _) = watch::channel(AgentSnapshot::default());

        Self {
            state: Arc::new(Mutex::new(AgentState::new())),
            stages,
            capture,
            settings,
            metrics,
            snapshots: Arc::new(snapshots),
            driver: Arc::new(Mutex::new(None)),
        }
    }

    /// Builds the capture source from raw collaborators using the settings' display
    /// and capture timeout.
    pub fn with_collaborators(
        vision: Arc<dyn VisionClient>,
        capturer: Arc<dyn ScreenCapturer>,
        scheduler: Arc<dyn Scheduler>,
        settings: AgentSettings,
    ) -> Self {
        let metrics = MetricsCollector::new();
        let capture = CaptureSource::with_capture_timeout(
            capturer,
            scheduler,
            settings.display.clone(),
            metrics.clone(),
            settings.capture_timeout(),
        );
        Self::new(vision, capture, settings, metrics)
    }

    pub fn capture(&self) -> &CaptureSource {
        &self.capture
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentSnapshot> {
        self.snapshots.subscribe()
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn status(&self) -> AgentStatus {
        self.state.lock().await.status
    }

    pub async fn session(&self) -> SessionContext {
        self.state.lock().await.session.clone()
    }

    /// Plans `goal` and issues the first instruction. Allowed from `Idle` or `Completed`;
    /// a failed plan leaves the engine idle with the reason on screen.
    pub async fn start_session(&self, goal: &str) -> AgentResult<StepOutcome> {
        let goal = goal.trim().to_string();
        let ticket = {
            let mut state = self.state.lock().await;
            if state.is_processing {
                log_debug!("ignoring session start while busy");
                return Ok(StepOutcome::Busy);
            }
            if !matches!(state.status, AgentStatus::Idle | AgentStatus::Completed) {
                return Err(AgentError::SessionActive);
            }
            if goal.is_empty() {
                let err = AgentError::Planning("goal is empty".into());
                state.abandon(&err);
                self.emit(&state);
                return Err(err);
            }
            let ticket = state.begin_session(goal.clone());
            self.emit(&state);
            ticket
        };
        self.stop_driver().await;
        log_info!("session {} started: {}", ticket.id, goal);

        let result = match self.plan_session(&ticket, &goal).await {
            Ok(()) => self.navigate(&ticket).await,
            Err(err) => {
                let mut state = self.state.lock().await;
                if state.is_live(&ticket) {
                    log_warn!("session {} could not start: {}", ticket.id, err);
                    state.abandon(&err);
                    self.emit(&state);
                }
                return Err(err);
            }
        };

        self.finish(&ticket, &result).await;
        if result.is_ok() && self.settings.auto_advance_on_change {
            self.spawn_driver_for(&ticket).await;
        }
        result
    }

    /// One user-driven step: judge the outstanding instruction if there is one, then
    /// issue a fresh instruction unless the session just finished.
    pub async fn request_next_step(&self) -> AgentResult<StepOutcome> {
        let ticket = match self.begin_step().await {
            Ok(ticket) => ticket,
            Err(outcome) => return Ok(outcome),
        };

        let result = self.drive(&ticket).await;
        self.finish(&ticket, &result).await;
        result
    }

    /// `Navigating -> Watching`: asks the navigator for the next instruction.
    pub async fn process_step(&self) -> AgentResult<StepOutcome> {
        let ticket = match self.begin_step().await {
            Ok(ticket) => ticket,
            Err(outcome) => return Ok(outcome),
        };

        let result = self.navigate(&ticket).await;
        self.finish(&ticket, &result).await;
        result
    }

    /// `Watching -> Navigating | Completed`: judges the committed success criteria.
    pub async fn check_completion(&self) -> AgentResult<StepOutcome> {
        let ticket = match self.begin_step().await {
            Ok(ticket) => ticket,
            Err(outcome) => return Ok(outcome),
        };

        let result = self.check(&ticket).await;
        self.finish(&ticket, &result).await;
        result
    }

    /// Drops the session. Anything still in flight for it is discarded when it lands.
    /// Capture polling is left running.
    pub async fn reset(&self) {
        {
            let mut state = self.state.lock().await;
            if let Some(id) = state.session_id {
                log_info!("session {} reset", id);
            }
            state.reset();
            self.emit(&state);
        }
        self.stop_driver().await;
    }

    pub async fn update_display(&self, display: DisplayId) {
        self.capture.update_target(display).await;
    }

    pub async fn shutdown(&self) {
        self.reset().await;
        self.capture.stop_polling().await;
    }

    async fn begin_step(&self) -> Result<SessionTicket, StepOutcome> {
        let mut state = self.state.lock().await;
        if state.is_processing {
            log_debug!("ignoring step request while busy");
            return Err(StepOutcome::Busy);
        }
        if !matches!(state.status, AgentStatus::Navigating | AgentStatus::Watching) {
            return Err(StepOutcome::Inactive(state.status));
        }
        let Some(ticket) = state.ticket() else {
            return Err(StepOutcome::Inactive(state.status));
        };

        state.is_processing = true;
        self.emit(&state);
        Ok(ticket)
    }

    async fn finish(&self, ticket: &SessionTicket, result: &AgentResult<StepOutcome>) {
        let mut state = self.state.lock().await;
        if !state.is_live(ticket) {
            log_debug!("discarding result for reset session {}", ticket.id);
            return;
        }

        state.is_processing = false;
        if let Err(err) = result {
            log_warn!("step failed in {:?}: {}", state.status, err);
            state.record_error(err);
        }
        self.emit(&state);
    }

    async fn drive(&self, ticket: &SessionTicket) -> AgentResult<StepOutcome> {
        if self.status().await == AgentStatus::Watching {
            let checked = self.check(ticket).await?;
            if checked == StepOutcome::Completed {
                return Ok(checked);
            }
        }
        self.navigate(ticket).await
    }

    async fn plan_session(&self, ticket: &SessionTicket, goal: &str) -> AgentResult<()> {
        if !self.capture.request_permission().await {
            return Err(AgentError::PermissionDenied);
        }
        self.capture
            .start_polling(self.settings.capture_interval())
            .await;

        let frame = self.current_frame().await?;
        let milestones = self
            .call_stage(
                ticket,
                Stage::Plan,
                self.stages.planner.plan(goal, "", Some(&frame)),
            )
            .await?;
        if milestones.is_empty() {
            return Err(AgentError::Planning("no usable milestones".into()));
        }

        let mut state = self.state.lock().await;
        ensure_live(&state, ticket)?;
        log_info!(
            "session {} planned {} milestones",
            ticket.id,
            milestones.len()
        );
        state.session.milestones = milestones;
        state.session.active_milestone_index = 0;
        state.status = AgentStatus::Navigating;
        self.emit(&state);
        Ok(())
    }

    async fn navigate(&self, ticket: &SessionTicket) -> AgentResult<StepOutcome> {
        let (goal, milestone, memory, index) = {
            let state = self.state.lock().await;
            ensure_live(&state, ticket)?;
            if state.status != AgentStatus::Navigating {
                return Ok(StepOutcome::Inactive(state.status));
            }
            let Some(milestone) = state.session.active_milestone().cloned() else {
                return Ok(StepOutcome::Inactive(state.status));
            };
            (
                state.session.goal.clone(),
                milestone,
                state.session.blackboard.snapshot(),
                state.session.active_milestone_index,
            )
        };

        let frame = self.current_frame().await?;
        let step = self
            .call_stage(
                ticket,
                Stage::Navigate,
                self.stages
                    .navigator
                    .next(&goal, &milestone, &memory, Some(&frame)),
            )
            .await?;

        let mut state = self.state.lock().await;
        ensure_live(&state, ticket)?;

        if !step.is_actionable() {
            log_warn!("navigator gave no usable step for milestone {}", milestone.id);
            state.current_instruction = step.instruction;
            state.value_to_copy = None;
            state.last_error = Some(
                AgentError::MalformedOutput("step without success criteria".into()).to_string(),
            );
            self.emit(&state);
            return Ok(StepOutcome::NoStep);
        }

        let written = state.session.blackboard.merge(step.memory_writes);
        if written > 0 {
            log_debug!("navigator stored {} values", written);
        }
        state.pending_criteria = step.success_criteria;
        state.issued_instruction = Some(step.instruction.clone());
        state.current_instruction = step.instruction;
        state.value_to_copy = step.value_to_copy;
        state.last_error = None;
        state.status = AgentStatus::Watching;
        self.emit(&state);

        Ok(StepOutcome::Instructed {
            milestone_index: index,
        })
    }

    async fn check(&self, ticket: &SessionTicket) -> AgentResult<StepOutcome> {
        let criteria = {
            let mut state = self.state.lock().await;
            ensure_live(&state, ticket)?;
            if state.status != AgentStatus::Watching {
                return Ok(StepOutcome::Inactive(state.status));
            }
            match state.pending_criteria.clone() {
                Some(criteria) => criteria,
                None => {
                    state.status = AgentStatus::Navigating;
                    self.emit(&state);
                    return Ok(StepOutcome::NotComplete {
                        reasoning: "no success criteria to check".into(),
                    });
                }
            }
        };

        let frame = self.current_frame().await?;
        let verdict = self
            .call_stage(
                ticket,
                Stage::Watch,
                self.stages.watcher.check(&criteria, Some(&frame)),
            )
            .await?;

        if !verdict.is_complete {
            let stalled = {
                let mut state = self.state.lock().await;
                ensure_live(&state, ticket)?;
                log_debug!("watcher rejected step: {}", verdict.reasoning);
                state.pending_criteria = None;
                state.issued_instruction = None;
                state.stalled_checks = state.stalled_checks.saturating_add(1);
                state.status = AgentStatus::Navigating;
                self.emit(&state);
                state.stalled_checks
            };

            let threshold = self.settings.replan_after_stalled_checks;
            if threshold > 0 && stalled >= threshold {
                self.replan_remaining(ticket).await?;
            }
            return Ok(StepOutcome::NotComplete {
                reasoning: verdict.reasoning,
            });
        }

        let (milestone, completed_index) = {
            let mut state = self.state.lock().await;
            ensure_live(&state, ticket)?;
            let action = state.issued_instruction.take();
            let index = state.session.active_milestone_index;
            let Some(milestone) = state.session.active_milestone_mut() else {
                return Ok(StepOutcome::Inactive(state.status));
            };
            milestone.complete_with(action);
            let milestone = milestone.clone();
            state.pending_criteria = None;
            state.stalled_checks = 0;
            self.emit(&state);
            (milestone, index)
        };
        log_info!("milestone {} complete: {}", milestone.id, milestone.title);

        let summary = match self
            .call_stage(
                ticket,
                Stage::Summarize,
                self.stages
                    .summarizer
                    .summarize(&milestone, &milestone.completed_actions),
            )
            .await
        {
            Ok(summary) => summary,
            Err(AgentError::Stale) => return Err(AgentError::Stale),
            Err(err) => {
                log_warn!("summary failed, using fallback: {}", err);
                fallback_summary(&milestone)
            }
        };

        let mut state = self.state.lock().await;
        ensure_live(&state, ticket)?;
        state.session.history_log.push(summary);
        let outcome = if state.session.advance() {
            state.status = AgentStatus::Navigating;
            state.current_instruction = format!("Done: {}", milestone.title);
            StepOutcome::MilestoneCompleted { completed_index }
        } else {
            log_info!("session {} completed its goal", ticket.id);
            state.status = AgentStatus::Completed;
            state.current_instruction = COMPLETED_INSTRUCTION.to_string();
            StepOutcome::Completed
        };
        state.value_to_copy = None;
        self.emit(&state);
        Ok(outcome)
    }

    /// Replaces the milestones that are not done yet with a fresh plan built from the
    /// summarized history. A failed or empty replan keeps the current plan.
    async fn replan_remaining(&self, ticket: &SessionTicket) -> AgentResult<()> {
        let (goal, history) = {
            let state = self.state.lock().await;
            ensure_live(&state, ticket)?;
            (state.session.goal.clone(), state.session.history_summary())
        };
        log_info!("replanning session {} after stalled checks", ticket.id);

        let frame = self.current_frame().await?;
        let replanned = match self
            .call_stage(
                ticket,
                Stage::Plan,
                self.stages.planner.plan(&goal, &history, Some(&frame)),
            )
            .await
        {
            Ok(milestones) => milestones,
            Err(AgentError::Stale) => return Err(AgentError::Stale),
            Err(err) => {
                log_warn!("replan failed, keeping current plan: {}", err);
                return Ok(());
            }
        };
        if replanned.is_empty() {
            log_warn!("replan returned nothing, keeping current plan");
            return Ok(());
        }

        let mut state = self.state.lock().await;
        ensure_live(&state, ticket)?;
        state.session.replace_remaining(replanned);
        state.stalled_checks = 0;
        self.emit(&state);
        Ok(())
    }

    /// Latest changed frame, capturing one on demand if nothing has arrived yet.
    async fn current_frame(&self) -> AgentResult<Frame> {
        if let Some(frame) = self.capture.latest_frame() {
            return Ok(frame);
        }
        self.capture.capture_once().await?;
        self.capture.latest_frame().ok_or(AgentError::NoFrame)
    }

    /// Awaits one stage call, bounded by the stage timeout and abandoned on reset.
    async fn call_stage<T, F>(&self, ticket: &SessionTicket, stage: Stage, call: F) -> AgentResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let timeout = self.settings.stage_timeout();

        let result = tokio::select! {
            _ = ticket.cancel.cancelled() => Err(AgentError::Stale),
            res = tokio::time::timeout(timeout, call) => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(AgentError::Model(err)),
                Err(_) => Err(AgentError::Timeout(stage.as_str(), timeout.as_secs())),
            },
        };

        self.metrics
            .record_stage(StageMetrics {
                timestamp: Utc::now(),
                stage,
                duration_ms: started.elapsed().as_millis() as u64,
                succeeded: result.is_ok(),
            })
            .await;

        if ticket.cancel.is_cancelled() {
            log_debug!("{} response discarded after reset", stage);
            return Err(AgentError::Stale);
        }
        if let Err(err) = &result {
            log_error!("{} call failed: {}", stage, err);
        }
        result
    }

    /// Starts a task that requests a step whenever a changed frame is published, for as
    /// long as the current session lives. Replaces any running driver. Returns false
    /// when there is no session to drive.
    pub async fn spawn_frame_driver(&self) -> bool {
        let ticket = self.state.lock().await.ticket();
        match ticket {
            Some(ticket) => self.spawn_driver_for(&ticket).await,
            None => {
                log_debug!("no session for the frame driver");
                false
            }
        }
    }

    async fn spawn_driver_for(&self, ticket: &SessionTicket) -> bool {
        let mut driver = self.driver.lock().await;
        if let Some((_, previous)) = driver.take() {
            previous.cancel();
        }
        if !self.state.lock().await.is_live(ticket) {
            log_debug!("session {} ended before its frame driver started", ticket.id);
            return false;
        }

        // Child of the session token, so a reset stops the driver on its own.
        let cancel = ticket.cancel.child_token();
        let token = cancel.clone();
        let controller = self.clone();
        let mut frames = self.capture.subscribe_frames();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = frames.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let has_frame = frames.borrow_and_update().is_some();
                        if !has_frame {
                            continue;
                        }
                        match controller.request_next_step().await {
                            Ok(StepOutcome::Inactive(_)) | Ok(StepOutcome::Busy) => {}
                            Ok(outcome) => log_debug!("auto step: {:?}", outcome),
                            Err(err) => log_warn!("auto step failed: {}", err),
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        *driver = Some((handle, cancel));
        true
    }

    async fn stop_driver(&self) {
        if let Some((_, cancel)) = self.driver.lock().await.take() {
            cancel.cancel();
        }
    }

    fn emit(&self, state: &AgentState) {
        self.snapshots.send_replace(state.snapshot());
    }
}

fn ensure_live(state: &AgentState, ticket: &SessionTicket) -> AgentResult<()> {
    if state.is_live(ticket) {
        Ok(())
    } else {
        Err(AgentError::Stale)
    }
}
