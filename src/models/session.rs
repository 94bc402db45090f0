use serde::{Deserialize, Serialize};

use crate::blackboard::Blackboard;

use super::Milestone;

/// Everything one assistance session knows. Exactly one is live at a time and the
/// agent controller owns it exclusively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub goal: String,
    /// Always within `0..=milestones.len()`; equal to the length once every milestone is done.
    pub active_milestone_index: usize,
    pub milestones: Vec<Milestone>,
    pub blackboard: Blackboard,
    pub history_log: Vec<String>,
}

impl SessionContext {
    pub fn new(goal: impl Into<String>, milestones: Vec<Milestone>) -> Self {
        Self {
            goal: goal.into(),
            active_milestone_index: 0,
            milestones,
            blackboard: Blackboard::new(),
            history_log: Vec::new(),
        }
    }

    pub fn active_milestone(&self) -> Option<&Milestone> {
        self.milestones.get(self.active_milestone_index)
    }

    pub fn active_milestone_mut(&mut self) -> Option<&mut Milestone> {
        self.milestones.get_mut(self.active_milestone_index)
    }

    pub fn is_finished(&self) -> bool {
        !self.milestones.is_empty() && self.active_milestone_index >= self.milestones.len()
    }

    /// Moves past the active milestone. Returns true while milestones remain.
    pub fn advance(&mut self) -> bool {
        if self.active_milestone_index < self.milestones.len() {
            self.active_milestone_index += 1;
        }
        self.active_milestone_index < self.milestones.len()
    }

    /// History rendered for the planner; the planner never sees raw action logs.
    pub fn history_summary(&self) -> String {
        self.history_log
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{}. {}", i + 1, entry))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replaces the not-yet-completed tail with a fresh plan. Completed milestones stay put
    /// and new ids continue after them, keeping ids unique and contiguous from 1.
    pub fn replace_remaining(&mut self, replanned: Vec<Milestone>) {
        let kept = self.active_milestone_index.min(self.milestones.len());
        self.milestones.truncate(kept);
        let offset = kept as u32;
        self.milestones
            .extend(replanned.into_iter().enumerate().map(|(i, mut m)| {
                m.id = offset + i as u32 + 1;
                m.is_completed = false;
                m.completed_actions.clear();
                m
            }));
    }
}
