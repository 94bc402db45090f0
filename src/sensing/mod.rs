mod capture_source;
mod capturer;
pub mod change_detector;
mod scheduler;

pub use capture_source::{CaptureFailure, CaptureOutcome, CaptureSource};
pub use capturer::ScreenCapturer;
pub use change_detector::{detect_change, ChangeDecision, ChangeFingerprint};
pub use scheduler::{ManualScheduler, ScheduledTick, Scheduler, TickCallback, TickFuture, TokioScheduler};
