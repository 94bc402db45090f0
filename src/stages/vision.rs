use anyhow::Result;
use async_trait::async_trait;

use crate::models::Frame;

use super::{prompts, Stage};

/// One prompt for the vision/language backend, tagged with the stage asking so a
/// backend can route stages to different models.
#[derive(Debug, Clone)]
pub struct VisionRequest<'a> {
    pub stage: Stage,
    pub prompt: String,
    pub frame: Option<&'a Frame>,
}

/// Vision/language model backend. Both calls return raw model text; the stages own
/// parsing and treat malformed text as recoverable.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze(&self, request: VisionRequest<'_>) -> Result<String>;

    /// `max_milestones` is the most the caller will keep; backends pass it on to the model.
    async fn generate_plan(
        &self,
        goal: &str,
        history: &str,
        max_milestones: usize,
        frame: Option<&Frame>,
    ) -> Result<String> {
        self.analyze(VisionRequest {
            stage: Stage::Plan,
            prompt: prompts::plan_prompt(goal, history, max_milestones),
            frame,
        })
        .await
    }
}
