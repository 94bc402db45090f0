//! Scripted collaborators for driving the engine without a screen or a model backend.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Duration;

use crate::models::{DisplayId, Frame};
use crate::sensing::ScreenCapturer;
use crate::stages::{prompts, Stage, VisionClient, VisionRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Frame filled with a single color.
pub fn solid_frame(display: &str, width: u32, height: u32, rgba: [u8; 4]) -> Frame {
    let pixels = rgba
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect();
    match Frame::from_rgba(DisplayId::new(display), width, height, pixels) {
        Ok(frame) => frame,
        Err(err) => panic!("solid_frame built an invalid buffer: {err}"),
    }
}

/// Capturer that serves whatever frame was last set for each display.
pub struct ScriptedCapturer {
    permission: AtomicBool,
    screens: Mutex<HashMap<DisplayId, Frame>>,
    failures_left: AtomicU32,
    calls: AtomicUsize,
    requested: Mutex<Vec<DisplayId>>,
}

impl ScriptedCapturer {
    pub fn new() -> Self {
        Self {
            permission: AtomicBool::new(true),
            screens: Mutex::new(HashMap::new()),
            failures_left: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// Shows `frame` on the display it is tagged with.
    pub fn set_screen(&self, frame: Frame) {
        lock(&self.screens).insert(frame.display().clone(), frame);
    }

    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn capture_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested_displays(&self) -> Vec<DisplayId> {
        lock(&self.requested).clone()
    }
}

impl Default for ScriptedCapturer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScreenCapturer for ScriptedCapturer {
    async fn request_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    async fn capture(&self, display: &DisplayId) -> Result<Frame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requested).push(display.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("display {display} is not available"));
        }

        lock(&self.screens)
            .get(display)
            .cloned()
            .ok_or_else(|| anyhow!("display {display} is not connected"))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub stage: Stage,
    pub prompt: String,
    pub had_frame: bool,
}

/// Vision backend that replays queued replies per stage. An empty queue is a
/// transport error.
#[derive(Default)]
pub struct ScriptedVision {
    replies: Mutex<HashMap<Stage, VecDeque<Result<String, String>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    plan_histories: Mutex<Vec<String>>,
    gates: Mutex<HashMap<Stage, Arc<Notify>>>,
}

impl ScriptedVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stage: Stage, reply: impl Into<String>) {
        lock(&self.replies)
            .entry(stage)
            .or_default()
            .push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, stage: Stage, message: impl Into<String>) {
        lock(&self.replies)
            .entry(stage)
            .or_default()
            .push_back(Err(message.into()));
    }

    pub fn push_plan(&self, reply: impl Into<String>) {
        self.push(Stage::Plan, reply);
    }

    pub fn push_step(&self, instruction: &str, criteria: &str) {
        self.push(
            Stage::Navigate,
            serde_json::json!({
                "instruction": instruction,
                "success_criteria": criteria,
                "memory_writes": {},
                "value_to_copy": null,
            })
            .to_string(),
        );
    }

    pub fn push_verdict(&self, is_complete: bool, reasoning: &str) {
        self.push(
            Stage::Watch,
            serde_json::json!({ "is_complete": is_complete, "reasoning": reasoning }).to_string(),
        );
    }

    pub fn push_summary(&self, reply: impl Into<String>) {
        self.push(Stage::Summarize, reply);
    }

    /// Calls for `stage` block until the returned handle is notified, one permit per call.
    pub fn gate(&self, stage: Stage) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        lock(&self.gates).insert(stage, Arc::clone(&notify));
        notify
    }

    pub fn ungate(&self, stage: Stage) {
        lock(&self.gates).remove(&stage);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        lock(&self.calls).iter().filter(|c| c.stage == stage).count()
    }

    pub fn plan_histories(&self) -> Vec<String> {
        lock(&self.plan_histories).clone()
    }

    /// Yields until `stage` has been called `count` times, or panics after a second.
    pub async fn wait_for_calls(&self, stage: Stage, count: usize) {
        for _ in 0..1000 {
            if self.call_count(stage) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("{stage} was never called {count} times");
    }
}

#[async_trait]
impl VisionClient for ScriptedVision {
    async fn analyze(&self, request: VisionRequest<'_>) -> Result<String> {
        let stage = request.stage;
        lock(&self.calls).push(RecordedCall {
            stage,
            prompt: request.prompt,
            had_frame: request.frame.is_some(),
        });

        let gate = lock(&self.gates).get(&stage).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let reply = lock(&self.replies)
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted {stage} reply")),
        }
    }

    async fn generate_plan(
        &self,
        goal: &str,
        history: &str,
        max_milestones: usize,
        frame: Option<&Frame>,
    ) -> Result<String> {
        lock(&self.plan_histories).push(history.to_string());
        self.analyze(VisionRequest {
            stage: Stage::Plan,
            prompt: prompts::plan_prompt(goal, history, max_milestones),
            frame,
        })
        .await
    }
}
