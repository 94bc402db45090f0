use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::ImageFormat;
use serde::{Deserialize, Serialize};

/// Identifier of a physical display a frame can be captured from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(String);

impl DisplayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn main() -> Self {
        Self("main".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DisplayId {
    fn default() -> Self {
        Self::main()
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DisplayId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Immutable snapshot of a display's content as tightly packed RGBA8 pixels.
///
/// The pixel buffer is shared, so cloning a frame never copies image data.
#[derive(Clone)]
pub struct Frame {
    display: DisplayId,
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    pub fn from_rgba(display: DisplayId, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("frame has no pixels ({}x{})", width, height);
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .context("frame dimensions overflow")?;
        if pixels.len() != expected {
            bail!(
                "frame buffer is {} bytes, expected {} for {}x{} RGBA",
                pixels.len(),
                expected,
                width,
                height
            );
        }

        Ok(Self {
            display,
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// Decodes an encoded PNG screenshot, the shape most OS capture bridges hand back.
    pub fn from_png(display: DisplayId, png_bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory_with_format(png_bytes, ImageFormat::Png)
            .context("failed to decode PNG screenshot")?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba(display, width, height, img.into_raw())
    }

    pub fn display(&self) -> &DisplayId {
        &self.display
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("display", &self.display)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
