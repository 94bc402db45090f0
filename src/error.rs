use thiserror::Error;

/// Failures the orchestrator can report for a single step. None of them are fatal:
/// each one is mirrored into the user-visible instruction and the engine stays usable.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("screen capture permission was denied")]
    PermissionDenied,

    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("no screen frame is available yet")]
    NoFrame,

    #[error("could not build a plan: {0}")]
    Planning(String),

    #[error("model returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("model call failed: {0:#}")]
    Model(#[from] anyhow::Error),

    #[error("{0} timed out after {1}s")]
    Timeout(&'static str, u64),

    #[error("a session is already active")]
    SessionActive,

    #[error("response arrived after the session was reset")]
    Stale,
}

impl AgentError {
    /// Text shown on the instruction surface when this error ends a step.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::PermissionDenied => {
                "Screen recording permission is required. Grant it and start again.".into()
            }
            AgentError::Capture(_) | AgentError::NoFrame => {
                "Couldn't read the screen. Try again in a moment.".into()
            }
            AgentError::Planning(_) => {
                "Couldn't work out a plan for that goal. Please try again.".into()
            }
            AgentError::MalformedOutput(_) => {
                "Couldn't work out the next step. Request the next step to retry.".into()
            }
            AgentError::Model(_) | AgentError::Timeout(..) => {
                "The assistant didn't respond. Request the next step to retry.".into()
            }
            AgentError::SessionActive => "A session is already running. Reset it first.".into(),
            AgentError::Stale => String::new(),
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
