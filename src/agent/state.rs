use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AgentError;
use crate::models::SessionContext;

pub const IDLE_INSTRUCTION: &str = "Enter a goal to get started.";
pub const PLANNING_INSTRUCTION: &str = "Working out a plan...";
pub const COMPLETED_INSTRUCTION: &str = "All done! Your goal is complete.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Planning,
    Navigating,
    Watching,
    Completed,
}

/// What the presentation layer renders. Published on every state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub status: AgentStatus,
    pub current_instruction: String,
    pub is_processing: bool,
    pub value_to_copy: Option<String>,
    pub active_milestone_index: usize,
    pub milestone_count: usize,
    pub last_error: Option<String>,
}

impl Default for AgentSnapshot {
    fn default() -> Self {
        AgentState::default().snapshot()
    }
}

/// Proof that a caller owns the in-flight call for one session. Results are only
/// applied while the ticket's session is still the live one.
#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub id: Uuid,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct AgentState {
    pub status: AgentStatus,
    pub session_id: Option<Uuid>,
    pub session: SessionContext,
    pub cancel: Option<CancellationToken>,
    pub is_processing: bool,
    pub current_instruction: String,
    pub value_to_copy: Option<String>,
    /// Success bar committed by the last instruction; the watcher judges against it.
    pub pending_criteria: Option<String>,
    pub issued_instruction: Option<String>,
    /// Watcher rejections in a row on the active milestone.
    pub stalled_checks: u32,
    pub last_error: Option<String>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Idle,
            session_id: None,
            session: SessionContext::default(),
            cancel: None,
            is_processing: false,
            current_instruction: IDLE_INSTRUCTION.to_string(),
            value_to_copy: None,
            pending_criteria: None,
            issued_instruction: None,
            stalled_checks: 0,
            last_error: None,
        }
    }
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            status: self.status,
            current_instruction: self.current_instruction.clone(),
            is_processing: self.is_processing,
            value_to_copy: self.value_to_copy.clone(),
            active_milestone_index: self.session.active_milestone_index,
            milestone_count: self.session.milestones.len(),
            last_error: self.last_error.clone(),
        }
    }

    /// Replaces whatever was here with a fresh session in `Planning`, already marked busy.
    pub fn begin_session(&mut self, goal: String) -> SessionTicket {
        self.reset();

        let ticket = SessionTicket {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        self.status = AgentStatus::Planning;
        self.session_id = Some(ticket.id);
        self.session = SessionContext::new(goal, Vec::new());
        self.cancel = Some(ticket.cancel.clone());
        self.is_processing = true;
        self.current_instruction = PLANNING_INSTRUCTION.to_string();
        ticket
    }

    pub fn ticket(&self) -> Option<SessionTicket> {
        Some(SessionTicket {
            id: self.session_id?,
            cancel: self.cancel.clone()?,
        })
    }

    pub fn is_live(&self, ticket: &SessionTicket) -> bool {
        self.session_id == Some(ticket.id) && !ticket.cancel.is_cancelled()
    }

    /// Wipes the session and cancels anything still in flight for it.
    pub fn reset(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        *self = Self::default();
    }

    /// Drops a session that never got going, keeping the reason on screen.
    pub fn abandon(&mut self, err: &AgentError) {
        self.reset();
        self.record_error(err);
    }

    pub fn record_error(&mut self, err: &AgentError) {
        if matches!(err, AgentError::Stale) {
            return;
        }
        self.last_error = Some(err.to_string());
        self.current_instruction = err.user_message();
        self.value_to_copy = None;
    }
}
