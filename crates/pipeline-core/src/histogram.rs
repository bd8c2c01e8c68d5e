//! Per-channel color histograms and the scene-change distance.

use findr_frame_model::Frame;

/// Bins per color channel.
pub const BINS: usize = 32;

/// Normalized RGB histogram of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorHistogram {
    channels: [[f32; BINS]; 3],
    pixels: u64,
}

impl ColorHistogram {
    pub fn from_frame(frame: &Frame) -> Self {
        Self::from_rgb(frame.as_raw())
    }

    /// Build from interleaved RGB8 bytes. A trailing partial pixel is ignored.
    pub fn from_rgb(raw: &[u8]) -> Self {
        let mut counts = [[0u64; BINS]; 3];
        let mut pixels = 0u64;
        for px in raw.chunks_exact(3) {
            for (channel, &value) in px.iter().enumerate() {
                counts[channel][value as usize * BINS / 256] += 1;
            }
            pixels += 1;
        }

        let mut channels = [[0f32; BINS]; 3];
        if pixels > 0 {
            for (dst, src) in channels.iter_mut().zip(counts.iter()) {
                for (bin, &count) in dst.iter_mut().zip(src.iter()) {
                    *bin = count as f32 / pixels as f32;
                }
            }
        }
        Self { channels, pixels }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels == 0
    }

    /// Bhattacharyya (Hellinger) distance averaged over channels, in `[0, 1]`.
    ///
    /// Identical histograms give 0; histograms with no overlapping bins give 1.
    pub fn distance(&self, other: &ColorHistogram) -> f32 {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => return 0.0,
            (true, false) | (false, true) => return 1.0,
            (false, false) => {}
        }

        let total: f32 = self
            .channels
            .iter()
            .zip(other.channels.iter())
            .map(|(p, q)| {
                let coefficient: f32 = p.iter().zip(q.iter()).map(|(a, b)| (a * b).sqrt()).sum();
                (1.0 - coefficient).max(0.0).sqrt()
            })
            .sum();
        (total / 3.0).clamp(0.0, 1.0)
    }
}

/// Scene-change score of `current` against the last fully processed frame.
/// Without a baseline the score is maximal.
pub fn scene_change_score(baseline: Option<&ColorHistogram>, current: &ColorHistogram) -> f32 {
    baseline.map_or(1.0, |b| b.distance(current))
}
