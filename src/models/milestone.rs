use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A verifiable checkpoint on the way from the current screen to the goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: u32,
    pub title: String,
    pub description: String,
    pub is_completed: bool,
    pub completed_actions: Vec<String>,
}

impl Milestone {
    pub fn new(id: u32, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
            is_completed: false,
            completed_actions: Vec::new(),
        }
    }

    /// Completion is one-way; an already completed milestone only gains the action.
    pub fn complete_with(&mut self, action: Option<String>) {
        if let Some(action) = action {
            self.completed_actions.push(action);
        }
        self.is_completed = true;
    }
}

/// Output of one navigator pass. Consumed immediately, never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub instruction: String,
    pub success_criteria: Option<String>,
    pub memory_writes: HashMap<String, String>,
    pub value_to_copy: Option<String>,
}

impl StepResult {
    /// A step is only actionable when it names a post-condition the watcher can check.
    pub fn is_actionable(&self) -> bool {
        !self.instruction.trim().is_empty()
            && self
                .success_criteria
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatchResult {
    pub is_complete: bool,
    pub reasoning: String,
}

impl WatchResult {
    pub fn rejected(reasoning: impl Into<String>) -> Self {
        Self {
            is_complete: false,
            reasoning: reasoning.into(),
        }
    }
}
