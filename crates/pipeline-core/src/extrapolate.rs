//! Bounding-box extrapolation between full inference runs.
//!
//! Each tracked box keeps a short history of the full-run frames it was
//! observed in. Per-frame velocity is the weighted mean of the deltas
//! between consecutive observations, with linear weights so the most recent
//! delta counts most (weight `n` for the newest of `n` deltas, 1 for the
//! oldest). Boxes without a track id cannot be matched across frames and
//! are repeated unchanged.

use std::collections::{HashMap, VecDeque};

use findr_frame_model::{BoundingBox, Detection};

/// Observations kept per track.
pub const DEFAULT_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy)]
struct Observation {
    frame_index: u64,
    bbox: BoundingBox,
}

/// Extrapolates detections from recent full-run observations.
#[derive(Debug)]
pub struct BoxExtrapolator {
    window: usize,
    history: HashMap<i64, VecDeque<Observation>>,
    last: Vec<Detection>,
    last_frame_index: u64,
}

impl Default for BoxExtrapolator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl BoxExtrapolator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            history: HashMap::new(),
            last: Vec::new(),
            last_frame_index: 0,
        }
    }

    /// Record the detections of a full run at `frame_index`.
    ///
    /// Tracks absent from this run are forgotten.
    pub fn observe(&mut self, frame_index: u64, detections: &[Detection]) {
        self.history.retain(|id, _| {
            detections
                .iter()
                .any(|d| d.track_id == Some(*id))
        });

        for det in detections {
            let Some(id) = det.track_id else { continue };
            let entries = self.history.entry(id).or_default();
            if entries.back().is_some_and(|o| o.frame_index >= frame_index) {
                entries.clear();
            }
            entries.push_back(Observation {
                frame_index,
                bbox: det.bbox,
            });
            while entries.len() > self.window {
                entries.pop_front();
            }
        }

        self.last = detections.to_vec();
        self.last_frame_index = frame_index;
    }

    /// Per-frame velocity of a track as `[dx1, dy1, dx2, dy2]`.
    pub fn velocity(&self, track_id: i64) -> Option<[f32; 4]> {
        let entries = self.history.get(&track_id)?;
        if entries.len() < 2 {
            return None;
        }

        let mut weighted = [0f32; 4];
        let mut total_weight = 0f32;
        for (i, pair) in entries.iter().collect::<Vec<_>>().windows(2).enumerate() {
            let (prev, next) = (pair[0], pair[1]);
            let gap = next.frame_index.saturating_sub(prev.frame_index).max(1) as f32;
            let delta = prev.bbox.delta_to(&next.bbox);
            let weight = (i + 1) as f32;
            for (acc, d) in weighted.iter_mut().zip(delta) {
                *acc += weight * d / gap;
            }
            total_weight += weight;
        }
        Some(weighted.map(|v| v / total_weight))
    }

    /// Detections projected to `frame_index`, clamped to the frame bounds.
    pub fn extrapolate(&self, frame_index: u64, width: u32, height: u32) -> Vec<Detection> {
        let steps = frame_index.saturating_sub(self.last_frame_index) as f32;
        self.last
            .iter()
            .map(|det| {
                let velocity = det.track_id.and_then(|id| self.velocity(id));
                let bbox = match velocity {
                    Some(v) => det
                        .bbox
                        .offset(v.map(|c| c * steps))
                        .clamp_to(width, height),
                    None => det.bbox,
                };
                Detection { bbox, ..det.clone() }
            })
            .collect()
    }

    /// Detections from the most recent full run.
    pub fn last(&self) -> &[Detection] {
        &self.last
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last.clear();
        self.last_frame_index = 0;
    }
}
