use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use crate::models::Frame;

/// Byte-exact lossless encoding of a frame, used only for equality.
///
/// Encoder parameters are pinned so the same pixels always produce the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ChangeFingerprint(Arc<[u8]>);

impl ChangeFingerprint {
    pub fn of(frame: &Frame) -> Result<Self> {
        let mut encoded = Vec::with_capacity(frame.byte_len() / 4);
        PngEncoder::new_with_quality(&mut encoded, CompressionType::Fast, FilterType::NoFilter)
            .write_image(
                frame.pixels(),
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgba8,
            )
            .context("failed to encode frame fingerprint")?;
        Ok(Self(encoded.into()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ChangeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeFingerprint({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDecision {
    pub changed: bool,
    pub fingerprint: ChangeFingerprint,
}

/// Exact comparison against the reference; without a reference every frame counts as changed.
pub fn detect_change(
    frame: &Frame,
    reference: Option<&ChangeFingerprint>,
) -> Result<ChangeDecision> {
    Ok(compare(ChangeFingerprint::of(frame)?, reference))
}

/// Decision for an already computed fingerprint, for callers that encode off-thread.
pub fn compare(
    fingerprint: ChangeFingerprint,
    reference: Option<&ChangeFingerprint>,
) -> ChangeDecision {
    let changed = reference.map_or(true, |prev| *prev != fingerprint);
    ChangeDecision {
        changed,
        fingerprint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayId;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Frame {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Frame::from_rgba(DisplayId::main(), width, height, pixels).unwrap()
    }

    #[test]
    fn first_capture_always_changes() {
        let frame = solid(4, 4, [10, 20, 30, 255]);
        assert!(detect_change(&frame, None).unwrap().changed);
    }

    #[test]
    fn frame_against_own_fingerprint_is_unchanged() {
        let frame = solid(8, 6, [1, 2, 3, 255]);
        let fp = ChangeFingerprint::of(&frame).unwrap();
        assert!(!detect_change(&frame, Some(&fp)).unwrap().changed);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let frame = solid(16, 16, [200, 100, 50, 255]);
        let a = ChangeFingerprint::of(&frame).unwrap();
        let b = ChangeFingerprint::of(&frame.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn single_pixel_difference_is_a_change() {
        let base = solid(8, 8, [0, 0, 0, 255]);
        let mut pixels = base.pixels().to_vec();
        pixels[4 * 27] = 1;
        let tweaked = Frame::from_rgba(DisplayId::main(), 8, 8, pixels).unwrap();

        let fp = ChangeFingerprint::of(&base).unwrap();
        assert!(detect_change(&tweaked, Some(&fp)).unwrap().changed);
    }

    #[test]
    fn dimension_change_is_a_change() {
        let wide = solid(8, 2, [9, 9, 9, 255]);
        let tall = solid(2, 8, [9, 9, 9, 255]);
        let fp = ChangeFingerprint::of(&wide).unwrap();
        assert!(detect_change(&tall, Some(&fp)).unwrap().changed);
    }
}
