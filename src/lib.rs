//! Guides a user through an on-screen task one instruction at a time: a planner breaks the
//! goal into milestones, a navigator issues the next step against the current screen, and a
//! watcher decides when the step's success criteria are met.

pub mod agent;
pub mod blackboard;
pub mod error;
pub mod metrics;
pub mod models;
pub mod sensing;
pub mod settings;
pub mod stages;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod utils;

pub use agent::{AgentCommand, AgentController, AgentSnapshot, AgentStatus, StepOutcome};
pub use blackboard::Blackboard;
pub use error::{AgentError, AgentResult};
pub use metrics::MetricsCollector;
pub use models::{DisplayId, Frame, Milestone, SessionContext, StepResult, WatchResult};
pub use sensing::{CaptureSource, ScreenCapturer, Scheduler, TokioScheduler};
pub use settings::{AgentSettings, SettingsStore};
pub use stages::{Stage, VisionClient, VisionRequest};
pub use utils::logging::init as init_logging;
