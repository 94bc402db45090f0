use std::sync::Arc;

use anyhow::Result;

use crate::models::Milestone;

use super::prompts::summarize_prompt;
use super::vision::{VisionClient, VisionRequest};
use super::Stage;

pub const DEFAULT_SUMMARY_WORD_LIMIT: usize = 50;

/// Condenses a finished milestone into the one-sentence history entry the planner reads.
#[derive(Clone)]
pub struct MilestoneSummarizer {
    client: Arc<dyn VisionClient>,
    word_limit: usize,
}

impl MilestoneSummarizer {
    pub fn new(client: Arc<dyn VisionClient>) -> Self {
        Self {
            client,
            word_limit: DEFAULT_SUMMARY_WORD_LIMIT,
        }
    }

    pub fn with_word_limit(mut self, word_limit: usize) -> Self {
        self.word_limit = word_limit.max(1);
        self
    }

    pub async fn summarize(&self, milestone: &Milestone, actions: &[String]) -> Result<String> {
        let raw = self
            .client
            .analyze(VisionRequest {
                stage: Stage::Summarize,
                prompt: summarize_prompt(milestone, actions, self.word_limit),
                frame: None,
            })
            .await?;

        Ok(self.shape(&raw).unwrap_or_else(|| fallback_summary(milestone)))
    }

    /// First line, quotes stripped, capped at the word limit.
    fn shape(&self, raw: &str) -> Option<String> {
        let line = raw
            .lines()
            .map(|l| l.trim().trim_matches('"').trim())
            .find(|l| !l.is_empty())?;

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() <= self.word_limit {
            return Some(line.to_string());
        }
        let mut capped = words[..self.word_limit].join(" ");
        capped = capped.trim_end_matches([',', ';', ':']).to_string();
        if !capped.ends_with('.') {
            capped.push('.');
        }
        Some(capped)
    }
}

/// Used when the model gives nothing usable, so the history never has gaps.
pub fn fallback_summary(milestone: &Milestone) -> String {
    format!("Completed milestone \"{}\".", milestone.title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedVision;

    fn summarizer(reply: &str, limit: usize) -> MilestoneSummarizer {
        let vision = Arc::new(ScriptedVision::new());
        vision.push_summary(reply);
        MilestoneSummarizer::new(vision).with_word_limit(limit)
    }

    #[tokio::test]
    async fn caps_word_count() {
        let milestone = Milestone::new(1, "Open Safari", "");
        let summary = summarizer("one two three four five six, seven", 5)
            .summarize(&milestone, &[])
            .await
            .unwrap();
        assert_eq!(summary, "one two three four five.");
    }

    #[tokio::test]
    async fn empty_reply_falls_back() {
        let milestone = Milestone::new(1, "Open Safari", "");
        let summary = summarizer("  \n\"\"\n", 50)
            .summarize(&milestone, &["Click Safari".into()])
            .await
            .unwrap();
        assert_eq!(summary, "Completed milestone \"Open Safari\".");
    }

    #[tokio::test]
    async fn keeps_short_sentence_verbatim() {
        let milestone = Milestone::new(2, "Navigate", "");
        let summary = summarizer("\"Opened github.com in Safari.\"", 50)
            .summarize(&milestone, &[])
            .await
            .unwrap();
        assert_eq!(summary, "Opened github.com in Safari.");
    }
}
