mod navigator;
pub mod parse;
mod planner;
pub mod prompts;
mod summarizer;
mod vision;
mod watcher;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use navigator::{StepNavigator, NO_STEP_INSTRUCTION};
pub use planner::MilestonePlanner;
pub use summarizer::{fallback_summary, MilestoneSummarizer, DEFAULT_SUMMARY_WORD_LIMIT};
pub use vision::{VisionClient, VisionRequest};
pub use watcher::CompletionWatcher;

/// Which model-backed stage a call belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Plan,
    Navigate,
    Watch,
    Summarize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Plan => "planner",
            Stage::Navigate => "navigator",
            Stage::Watch => "watcher",
            Stage::Summarize => "summarizer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
