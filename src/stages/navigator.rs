use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::models::{Frame, Milestone, StepResult};

use super::parse::{parse_json, value_to_string};
use super::prompts::navigate_prompt;
use super::vision::{VisionClient, VisionRequest};
use super::Stage;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const NO_STEP_INSTRUCTION: &str =
    "Couldn't work out the next step from the screen. Request the next step to try again.";

#[derive(Debug, Deserialize)]
struct StepPayload {
    #[serde(default)]
    instruction: String,
    #[serde(default, alias = "successCriteria")]
    success_criteria: Option<String>,
    #[serde(default, alias = "memoryWrites")]
    memory_writes: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, alias = "valueToCopy")]
    value_to_copy: Option<serde_json::Value>,
}

/// Turns the active milestone into the single next thing the user should do.
#[derive(Clone)]
pub struct StepNavigator {
    client: Arc<dyn VisionClient>,
}

impl StepNavigator {
    pub fn new(client: Arc<dyn VisionClient>) -> Self {
        Self { client }
    }

    /// Transport failures propagate. Unusable output yields a step with no success
    /// criteria, which the orchestrator refuses to act on.
    pub async fn next(
        &self,
        goal: &str,
        milestone: &Milestone,
        blackboard: &BTreeMap<String, String>,
        frame: Option<&Frame>,
    ) -> Result<StepResult> {
        let raw = self
            .client
            .analyze(VisionRequest {
                stage: Stage::Navigate,
                prompt: navigate_prompt(goal, milestone, blackboard),
                frame,
            })
            .await?;

        Ok(parse_step(&raw, blackboard))
    }
}

fn parse_step(raw: &str, blackboard: &BTreeMap<String, String>) -> StepResult {
    let payload = match parse_json::<StepPayload>(raw) {
        Ok(payload) => payload,
        Err(err) => {
            log_warn!("discarding malformed step: {err:#}");
            return unusable_step();
        }
    };

    let instruction = payload.instruction.trim().to_string();
    let success_criteria = payload
        .success_criteria
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if instruction.is_empty() || success_criteria.is_none() {
        log_warn!("discarding step without instruction or success criteria");
        return unusable_step();
    }

    let memory_writes = payload
        .memory_writes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| {
            let key = key.trim().to_string();
            let value = value_to_string(value)?.trim().to_string();
            (!key.is_empty() && !value.is_empty()).then_some((key, value))
        })
        .collect();

    let value_to_copy = payload
        .value_to_copy
        .and_then(value_to_string)
        .and_then(|v| resolve_copy_value(v.trim(), blackboard));

    StepResult {
        instruction,
        success_criteria,
        memory_writes,
        value_to_copy,
    }
}

/// Only stored values may be copied. The model usually names the key; a value it
/// echoes back verbatim is accepted too.
fn resolve_copy_value(raw: &str, blackboard: &BTreeMap<String, String>) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if let Some(value) = blackboard.get(raw) {
        return Some(value.clone());
    }
    let stored = blackboard.values().find(|value| value.as_str() == raw);
    if stored.is_none() {
        log_warn!("ignoring copy value that is not on the blackboard");
    }
    stored.cloned()
}

fn unusable_step() -> StepResult {
    StepResult {
        instruction: NO_STEP_INSTRUCTION.to_string(),
        ..StepResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> BTreeMap<String, String> {
        BTreeMap::from([("api_key".to_string(), "sk-live-123".to_string())])
    }

    #[test]
    fn parses_full_step() {
        let step = parse_step(
            r#"{"instruction": "Click Safari icon in Dock",
                "success_criteria": "Safari window visible",
                "memory_writes": {"order_id": 1234, "": "x", "blank": " "},
                "value_to_copy": null}"#,
            &board(),
        );
        assert!(step.is_actionable());
        assert_eq!(step.instruction, "Click Safari icon in Dock");
        assert_eq!(step.success_criteria.as_deref(), Some("Safari window visible"));
        assert_eq!(step.memory_writes.len(), 1);
        assert_eq!(step.memory_writes["order_id"], "1234");
        assert_eq!(step.value_to_copy, None);
    }

    #[test]
    fn resolves_copy_key_against_blackboard() {
        let step = parse_step(
            r#"{"instruction": "Paste the key", "successCriteria": "Key field filled",
                "valueToCopy": "api_key"}"#,
            &board(),
        );
        assert_eq!(step.value_to_copy.as_deref(), Some("sk-live-123"));
        assert!(step.memory_writes.is_empty());
    }

    #[test]
    fn copy_value_must_come_from_blackboard() {
        let step = parse_step(
            r#"{"instruction": "Paste the password", "success_criteria": "Field filled",
                "value_to_copy": "hunter2"}"#,
            &BTreeMap::new(),
        );
        assert!(step.is_actionable());
        assert_eq!(step.value_to_copy, None);

        let step = parse_step(
            r#"{"instruction": "Paste the key", "success_criteria": "Key field filled",
                "value_to_copy": "sk-live-123"}"#,
            &board(),
        );
        assert_eq!(step.value_to_copy.as_deref(), Some("sk-live-123"));
    }

    #[test]
    fn missing_criteria_is_unusable() {
        let step = parse_step(r#"{"instruction": "Click OK"}"#, &board());
        assert!(!step.is_actionable());
        assert_eq!(step.instruction, NO_STEP_INSTRUCTION);
    }

    #[test]
    fn garbage_is_unusable() {
        let step = parse_step("1. open safari 2. type url", &board());
        assert!(!step.is_actionable());
        assert!(step.memory_writes.is_empty());
    }
}
