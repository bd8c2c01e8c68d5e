//! Adaptive frame sampling.
//!
//! The [`Scheduler`] is a pure decision over a [`FrameContext`]. The mutable
//! per-stream state it reads (last frame index, baseline histogram of the
//! last fully processed frame, run of extrapolations) lives in
//! [`SamplerState`], owned by exactly one engine loop.

use serde::Serialize;

use findr_common::{FindrError, FindrResult};
use findr_frame_model::{Frame, FrameContext, RunMode};

use crate::histogram::{scene_change_score, ColorHistogram};

/// How full-inference frames are selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingMode {
    /// Run full inference when `frame_index % stride == 0`.
    FixedStride { stride: u32 },
    /// Run full inference when the scene-change score exceeds `threshold`.
    SceneChange { threshold: f32 },
}

/// Validated sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingPolicy {
    pub mode: SamplingMode,
    /// Force a full run after this many consecutive extrapolations; 0 disables.
    pub max_consecutive_extrapolations: u32,
}

impl SamplingPolicy {
    pub fn new(mode: SamplingMode, max_consecutive_extrapolations: u32) -> FindrResult<Self> {
        match mode {
            SamplingMode::FixedStride { stride: 0 } => {
                return Err(FindrError::configuration("sampling stride must be at least 1"))
            }
            // Scores never exceed 1.0, so a threshold of 1.0 would never fire.
            SamplingMode::SceneChange { threshold } if !(threshold > 0.0 && threshold < 1.0) => {
                return Err(FindrError::configuration(format!(
                    "scene_threshold must be in (0, 1), got {threshold}"
                )))
            }
            _ => {}
        }
        Ok(Self {
            mode,
            max_consecutive_extrapolations,
        })
    }
}

/// Decides per frame between full inference and extrapolation.
#[derive(Debug, Clone)]
pub struct Scheduler {
    policy: SamplingPolicy,
}

impl Scheduler {
    pub fn new(policy: SamplingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// Decide how to process the frame described by `ctx`, given how many
    /// frames in a row have already been extrapolated.
    pub fn decide(&self, ctx: &FrameContext, consecutive_extrapolations: u32) -> RunMode {
        if ctx.frame_index == 0 {
            return RunMode::Full;
        }
        let cap = self.policy.max_consecutive_extrapolations;
        if cap > 0 && consecutive_extrapolations >= cap {
            return RunMode::Full;
        }
        let full = match self.policy.mode {
            SamplingMode::FixedStride { stride } => ctx.frame_index % u64::from(stride) == 0,
            SamplingMode::SceneChange { threshold } => ctx.scene_change_score > threshold,
        };
        if full {
            RunMode::Full
        } else {
            RunMode::Extrapolated
        }
    }
}

/// Per-stream sampling state.
#[derive(Debug, Default)]
pub struct SamplerState {
    last_frame_idx: Option<u64>,
    baseline: Option<ColorHistogram>,
    consecutive_extrapolations: u32,
}

impl SamplerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the most recently observed frame.
    pub fn last_frame_idx(&self) -> Option<u64> {
        self.last_frame_idx
    }

    pub fn consecutive_extrapolations(&self) -> u32 {
        self.consecutive_extrapolations
    }

    /// Observe the next acquired frame and decide how to process it.
    ///
    /// Frames are indexed in acquisition order starting from 0. A full
    /// decision makes this frame the new scene-change baseline.
    pub fn observe(
        &mut self,
        scheduler: &Scheduler,
        frame: &Frame,
        timestamp_secs: f64,
    ) -> (FrameContext, RunMode) {
        let frame_index = self.last_frame_idx.map_or(0, |i| i + 1);
        let histogram = ColorHistogram::from_frame(frame);
        let score = scene_change_score(self.baseline.as_ref(), &histogram);
        let ctx = FrameContext::new(frame_index, score, timestamp_secs);

        let mode = scheduler.decide(&ctx, self.consecutive_extrapolations);
        match mode {
            RunMode::Full => {
                self.baseline = Some(histogram);
                self.consecutive_extrapolations = 0;
            }
            RunMode::Extrapolated => self.consecutive_extrapolations += 1,
        }
        self.last_frame_idx = Some(frame_index);
        (ctx, mode)
    }
}
