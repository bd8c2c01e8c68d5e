//! Decoded frames and their per-frame context.

use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// A decoded RGB8 frame.
///
/// Pixel storage is shared, so cloning a frame to keep it as the scheduler
/// baseline or to hand it to the encoder does not copy pixels.
#[derive(Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    /// Wrap an RGB image.
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Convert any decoded image to RGB8.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.to_rgb8())
    }

    /// A frame filled with a single color.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Borrow the underlying pixel buffer.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Raw interleaved RGB bytes.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Per-frame context created once by the engine for every acquired frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameContext {
    /// Zero-based index in acquisition order.
    pub frame_index: u64,

    /// Normalized dissimilarity to the last fully processed frame, in `[0, 1]`.
    pub scene_change_score: f32,

    /// Position of the frame in the source, in seconds.
    pub timestamp_secs: f64,
}

impl FrameContext {
    /// Create a context, clamping the score to `[0, 1]` and the timestamp to `>= 0`.
    pub fn new(frame_index: u64, scene_change_score: f32, timestamp_secs: f64) -> Self {
        let scene_change_score = if scene_change_score.is_nan() {
            1.0
        } else {
            scene_change_score.clamp(0.0, 1.0)
        };
        Self {
            frame_index,
            scene_change_score,
            timestamp_secs: timestamp_secs.max(0.0),
        }
    }
}

/// How a frame's results were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every capability ran its model.
    Full,
    /// Results were extrapolated from recent full runs without invoking models.
    Extrapolated,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Full => f.write_str("full"),
            RunMode::Extrapolated => f.write_str("extrapolated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame() {
        let frame = Frame::solid(4, 2, [255, 0, 0]);
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.as_raw().len(), 4 * 2 * 3);
        assert_eq!(&frame.as_raw()[..3], &[255, 0, 0]);
    }

    #[test]
    fn test_clone_shares_pixels() {
        let frame = Frame::solid(8, 8, [1, 2, 3]);
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.as_raw().as_ptr(), copy.as_raw().as_ptr()));
    }

    #[test]
    fn test_context_clamps() {
        let ctx = FrameContext::new(3, 1.7, -0.5);
        assert_eq!(ctx.scene_change_score, 1.0);
        assert_eq!(ctx.timestamp_secs, 0.0);

        let ctx = FrameContext::new(0, f32::NAN, 1.0);
        assert_eq!(ctx.scene_change_score, 1.0);
    }

    #[test]
    fn test_run_mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunMode::Extrapolated).unwrap(),
            "\"extrapolated\""
        );
    }
}
