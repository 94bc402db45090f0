pub mod commands;
mod controller;
mod state;

pub use commands::AgentCommand;
pub use controller::{AgentController, StepOutcome};
pub use state::{
    AgentSnapshot, AgentState, AgentStatus, SessionTicket, COMPLETED_INSTRUCTION,
    IDLE_INSTRUCTION, PLANNING_INSTRUCTION,
};
