//! Geometric result values produced by capabilities.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixels, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Create a box, swapping corners if they arrive reversed.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    /// Shift the box by `(dx, dy)`.
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Multiply all coordinates by per-axis factors.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }

    /// Per-corner difference `other - self`.
    pub fn delta_to(&self, other: &BoundingBox) -> [f32; 4] {
        [
            other.x1 - self.x1,
            other.y1 - self.y1,
            other.x2 - self.x2,
            other.y2 - self.y2,
        ]
    }

    /// Apply a per-corner offset.
    pub fn offset(&self, delta: [f32; 4]) -> Self {
        Self::new(
            self.x1 + delta[0],
            self.y1 + delta[1],
            self.x2 + delta[2],
            self.y2 + delta[3],
        )
    }
}

/// A single detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Tracker-assigned identity, stable across frames when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,

    /// Class label from the detector vocabulary.
    #[serde(rename = "class")]
    pub class_name: String,

    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,

    pub bbox: BoundingBox,
}

/// A single body keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// One person's pose: ordered keypoints plus the enclosing box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub id: u32,
    pub keypoints: Vec<Keypoint>,
    pub bbox: BoundingBox,
}

/// Instance mask as a closed polygon in source-frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
    pub polygon: Vec<[f32; 2]>,
}
