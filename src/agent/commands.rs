use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::models::DisplayId;

use super::controller::{AgentController, StepOutcome};
use super::state::AgentSnapshot;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Input from the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentCommand {
    StartSession { goal: String },
    RequestNextStep,
    Reset,
    DisplayChanged { display: DisplayId },
}

impl AgentController {
    /// Applies one command and returns the resulting snapshot. Failures are already
    /// mirrored into the snapshot, so they are only logged here.
    pub async fn dispatch(&self, command: AgentCommand) -> AgentSnapshot {
        log_debug!("dispatching {:?}", command);

        let result = match command {
            AgentCommand::StartSession { goal } => self.start_session(&goal).await.map(Some),
            AgentCommand::RequestNextStep => self.request_next_step().await.map(Some),
            AgentCommand::Reset => {
                self.reset().await;
                Ok(None)
            }
            AgentCommand::DisplayChanged { display } => {
                self.update_display(display).await;
                Ok(None)
            }
        };

        match result {
            Ok(Some(StepOutcome::Busy)) => log_debug!("command ignored while busy"),
            Ok(_) => {}
            Err(err) => log_warn!("command failed: {}", err),
        }
        self.snapshot().await
    }
}

pub async fn get_agent_state(controller: &AgentController) -> Result<AgentSnapshot, String> {
    Ok(controller.snapshot().await)
}

pub async fn start_session(controller: &AgentController, goal: String) -> Result<AgentSnapshot, String> {
    controller
        .start_session(&goal)
        .await
        .map_err(|e| e.to_string())?;
    Ok(controller.snapshot().await)
}

pub async fn request_next_step(controller: &AgentController) -> Result<AgentSnapshot, String> {
    controller
        .request_next_step()
        .await
        .map_err(|e| e.to_string())?;
    Ok(controller.snapshot().await)
}

pub async fn get_metrics(controller: &AgentController) -> Result<MetricsSnapshot, String> {
    Ok(controller.metrics().get_snapshot().await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::AgentStatus;
    use crate::sensing::ManualScheduler;
    use crate::settings::AgentSettings;
    use crate::stages::Stage;
    use crate::testing::{solid_frame, ScriptedCapturer, ScriptedVision};

    fn controller() -> (AgentController, Arc<ScriptedVision>, Arc<ScriptedCapturer>) {
        let vision = Arc::new(ScriptedVision::new());
        let capturer = Arc::new(ScriptedCapturer::new());
        capturer.set_screen(solid_frame("main", 2, 2, [0, 0, 0, 255]));
        capturer.set_screen(solid_frame("external-1", 2, 2, [9, 9, 9, 255]));
        let controller = AgentController::with_collaborators(
            vision.clone(),
            capturer.clone(),
            Arc::new(ManualScheduler::new()),
            AgentSettings::default(),
        );
        (controller, vision, capturer)
    }

    #[test]
    fn commands_use_tagged_json() {
        let command: AgentCommand =
            serde_json::from_str(r#"{"type": "startSession", "goal": "Open Safari"}"#).unwrap();
        assert_eq!(
            command,
            AgentCommand::StartSession {
                goal: "Open Safari".into()
            }
        );

        let command: AgentCommand =
            serde_json::from_str(r#"{"type": "displayChanged", "display": "external-1"}"#)
                .unwrap();
        assert_eq!(
            command,
            AgentCommand::DisplayChanged {
                display: DisplayId::new("external-1")
            }
        );
    }

    #[tokio::test]
    async fn dispatch_reports_failures_through_snapshot() {
        let (controller, vision, _) = controller();
        vision.push_plan("I can't help with that.");

        let snapshot = controller
            .dispatch(AgentCommand::StartSession {
                goal: "Open Safari".into(),
            })
            .await;
        assert_eq!(snapshot.status, AgentStatus::Idle);
        assert!(snapshot.last_error.is_some());
        assert!(!snapshot.is_processing);
    }

    #[tokio::test]
    async fn display_change_retargets_capture() {
        let (controller, vision, capturer) = controller();
        vision.push_plan(r#"[{"title": "Open Safari"}]"#);
        vision.push_step("Click Safari icon in Dock", "Safari window visible");
        controller
            .dispatch(AgentCommand::StartSession {
                goal: "Open Safari".into(),
            })
            .await;

        controller
            .dispatch(AgentCommand::DisplayChanged {
                display: DisplayId::new("external-1"),
            })
            .await;
        assert_eq!(
            controller.capture().current_target().await,
            DisplayId::new("external-1")
        );
        assert_eq!(
            capturer.requested_displays().last(),
            Some(&DisplayId::new("external-1"))
        );

        let snapshot = controller.dispatch(AgentCommand::Reset).await;
        assert_eq!(snapshot, AgentSnapshot::default());
        assert_eq!(vision.call_count(Stage::Navigate), 1);
    }

    #[tokio::test]
    async fn command_helpers_stringify_errors() {
        let (controller, _, capturer) = controller();
        capturer.set_permission(false);

        let err = start_session(&controller, "Open Safari".into())
            .await
            .unwrap_err();
        assert!(err.contains("permission"));
        assert_eq!(
            get_agent_state(&controller).await.unwrap().status,
            AgentStatus::Idle
        );
        assert_eq!(get_metrics(&controller).await.unwrap().stage_call_count, 0);

        let snapshot = request_next_step(&controller).await.unwrap();
        assert_eq!(snapshot.status, AgentStatus::Idle);
    }
}
