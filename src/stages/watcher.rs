use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::models::{Frame, WatchResult};

use super::parse::parse_json;
use super::prompts::watch_prompt;
use super::vision::{VisionClient, VisionRequest};
use super::Stage;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Deserialize)]
struct WatchPayload {
    #[serde(alias = "isComplete")]
    is_complete: bool,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Judges the screen against a previously committed success criterion.
#[derive(Clone)]
pub struct CompletionWatcher {
    client: Arc<dyn VisionClient>,
}

impl CompletionWatcher {
    pub fn new(client: Arc<dyn VisionClient>) -> Self {
        Self { client }
    }

    pub async fn check(&self, success_criteria: &str, frame: Option<&Frame>) -> Result<WatchResult> {
        let raw = self
            .client
            .analyze(VisionRequest {
                stage: Stage::Watch,
                prompt: watch_prompt(success_criteria),
                frame,
            })
            .await?;

        Ok(parse_verdict(&raw))
    }
}

/// A verdict without reasoning is not trusted, whatever it claims.
fn parse_verdict(raw: &str) -> WatchResult {
    let payload = match parse_json::<WatchPayload>(raw) {
        Ok(payload) => payload,
        Err(err) => {
            log_warn!("discarding malformed verdict: {err:#}");
            return WatchResult::rejected("verdict could not be parsed");
        }
    };

    match payload.reasoning.map(|r| r.trim().to_string()) {
        Some(reasoning) if !reasoning.is_empty() => WatchResult {
            is_complete: payload.is_complete,
            reasoning,
        },
        _ => {
            log_warn!("discarding verdict without reasoning");
            WatchResult::rejected("verdict had no reasoning")
        }
    }
}
