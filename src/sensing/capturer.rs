use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DisplayId, Frame};

/// OS-facing capture backend. Pixel grabbing and permission prompts live behind this
/// trait; everything above it only deals in [`Frame`]s.
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    /// Asks the OS for screen recording authorization. Denial must not have side effects.
    async fn request_permission(&self) -> bool;

    /// Grabs the current content of `display`.
    async fn capture(&self, display: &DisplayId) -> Result<Frame>;
}
