use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::models::{Frame, Milestone};

use super::parse::parse_json;
use super::prompts::DEFAULT_MAX_MILESTONES;
use super::vision::VisionClient;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanPayload {
    Wrapped { milestones: Vec<PlannedMilestone> },
    Bare(Vec<PlannedMilestone>),
}

#[derive(Debug, Deserialize)]
struct PlannedMilestone {
    #[serde(default, alias = "name")]
    title: String,
    #[serde(default)]
    description: String,
}

/// Breaks a goal into the milestones that remain, given what the history says is done.
#[derive(Clone)]
pub struct MilestonePlanner {
    client: Arc<dyn VisionClient>,
    max_milestones: usize,
}

impl MilestonePlanner {
    pub fn new(client: Arc<dyn VisionClient>) -> Self {
        Self {
            client,
            max_milestones: DEFAULT_MAX_MILESTONES,
        }
    }

    pub fn with_max_milestones(mut self, max_milestones: usize) -> Self {
        self.max_milestones = max_milestones.max(1);
        self
    }

    /// Transport failures propagate; unusable model output comes back as an empty plan.
    pub async fn plan(
        &self,
        goal: &str,
        history_summary: &str,
        frame: Option<&Frame>,
    ) -> Result<Vec<Milestone>> {
        let raw = self
            .client
            .generate_plan(goal, history_summary, self.max_milestones, frame)
            .await?;
        Ok(self.parse_plan(&raw))
    }

    fn parse_plan(&self, raw: &str) -> Vec<Milestone> {
        let planned = match parse_json::<PlanPayload>(raw) {
            Ok(PlanPayload::Wrapped { milestones }) | Ok(PlanPayload::Bare(milestones)) => {
                milestones
            }
            Err(err) => {
                log_warn!("discarding malformed plan: {err:#}");
                return Vec::new();
            }
        };

        planned
            .into_iter()
            .filter(|m| !m.title.trim().is_empty())
            .take(self.max_milestones)
            .enumerate()
            .map(|(i, m)| Milestone::new(i as u32 + 1, m.title.trim(), m.description.trim()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedVision;

    fn planner(reply: &str) -> (MilestonePlanner, Arc<ScriptedVision>) {
        let vision = Arc::new(ScriptedVision::new());
        vision.push_plan(reply);
        (MilestonePlanner::new(vision.clone()), vision)
    }

    #[tokio::test]
    async fn assigns_contiguous_ids_from_one() {
        let (planner, _) = planner(
            r#"{"milestones": [
                {"id": 9, "title": "Open Safari", "description": "Safari window visible"},
                {"id": 9, "title": "Navigate to Website", "description": "github.com loaded"},
                {"title": "Sign in", "description": "Avatar visible"}
            ]}"#,
        );
        let plan = planner.plan("goal", "", None).await.unwrap();

        let ids: Vec<u32> = plan.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(plan.iter().all(|m| !m.is_completed && m.completed_actions.is_empty()));
    }

    #[tokio::test]
    async fn accepts_bare_array_and_drops_untitled() {
        let (planner, _) =
            planner(r#"```json
[{"title": "A"}, {"title": "  "}, {"title": "B", "description": "b"}]
```"#);
        let plan = planner.plan("goal", "", None).await.unwrap();
        let titles: Vec<&str> = plan.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(plan[1].id, 2);
    }

    #[tokio::test]
    async fn truncates_to_max() {
        let items: Vec<String> = (1..=8).map(|i| format!(r#"{{"title": "m{i}"}}"#)).collect();
        let (planner, _) = planner(&format!("[{}]", items.join(",")));
        let planner = planner.with_max_milestones(5);
        assert_eq!(planner.plan("goal", "", None).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn configured_max_reaches_the_prompt() {
        let (planner, vision) = planner(r#"[{"title": "A"}]"#);
        let planner = planner.with_max_milestones(8);
        planner.plan("goal", "", None).await.unwrap();

        let calls = vision.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.contains("3 to 8 milestones"));
    }

    #[tokio::test]
    async fn malformed_output_is_an_empty_plan() {
        let (planner, _) = planner("I could not understand the screen.");
        assert!(planner.plan("goal", "", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn passes_history_to_the_client() {
        let (planner, vision) = planner(r#"[{"title": "A"}]"#);
        planner
            .plan("goal", "1. Opened Safari.", None)
            .await
            .unwrap();
        assert_eq!(vision.plan_histories(), vec!["1. Opened Safari.".to_string()]);
    }
}
