mod frame;
mod milestone;
mod session;

pub use frame::{DisplayId, Frame};
pub use milestone::{Milestone, StepResult, WatchResult};
pub use session::SessionContext;
