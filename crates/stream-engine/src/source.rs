//! Frame acquisition.
//!
//! Container demuxing and codec decode are external concerns; the sources
//! here read still-image sequences and generate synthetic frames. Anything
//! that can yield decoded frames in order can implement [`FrameSource`].

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use findr_common::{FindrError, FindrResult};
use findr_frame_model::Frame;

/// Scheme for generated test input: `synthetic://<count>?width=&height=&fps=`.
pub const SYNTHETIC_SCHEME: &str = "synthetic://";

/// Nominal frame rate for sources without timing information.
pub const DEFAULT_FPS: f64 = 30.0;

/// Largest accepted synthetic frame side, in pixels.
pub const MAX_SYNTHETIC_SIDE: u32 = 8192;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Sequential frame acquisition.
pub trait FrameSource: Send {
    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> FindrResult<Option<Frame>>;

    /// Source position of the most recently returned frame, in seconds.
    fn position_secs(&self) -> f64;

    /// Total frames, when known up front.
    fn frame_count(&self) -> Option<u64> {
        None
    }
}

/// Resolves a media locator to a frame source.
pub trait SourceOpener: Send + Sync {
    fn open(&self, locator: &str) -> FindrResult<Box<dyn FrameSource>>;
}

/// Opens image directories, single images, and `synthetic://` locators.
#[derive(Debug, Clone)]
pub struct DefaultSourceOpener {
    fps: f64,
}

impl Default for DefaultSourceOpener {
    fn default() -> Self {
        Self { fps: DEFAULT_FPS }
    }
}

impl DefaultSourceOpener {
    pub fn with_fps(fps: f64) -> Self {
        Self {
            fps: if fps > 0.0 { fps } else { DEFAULT_FPS },
        }
    }
}

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, locator: &str) -> FindrResult<Box<dyn FrameSource>> {
        if let Some(spec) = locator.strip_prefix(SYNTHETIC_SCHEME) {
            return Ok(Box::new(SyntheticSource::parse(spec, self.fps)?));
        }

        let path = Path::new(locator);
        if path.is_dir() {
            Ok(Box::new(ImageSequenceSource::from_dir(path, self.fps)?))
        } else if path.is_file() {
            Ok(Box::new(ImageSequenceSource::new(
                vec![path.to_path_buf()],
                self.fps,
            )))
        } else {
            Err(FindrError::source(format!("cannot open video source '{locator}'")))
        }
    }
}

/// Decodes a sorted list of image files, one frame each.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
    fps: f64,
}

impl ImageSequenceSource {
    pub fn new(paths: Vec<PathBuf>, fps: f64) -> Self {
        Self {
            paths,
            next: 0,
            fps,
        }
    }

    /// Every image file directly inside `dir`, in file-name order.
    pub fn from_dir(dir: &Path, fps: f64) -> FindrResult<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| FindrError::source(format!("cannot read {}: {e}", dir.display())))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(FindrError::source(format!(
                "no image frames found in {}",
                dir.display()
            )));
        }
        tracing::debug!(dir = %dir.display(), frames = paths.len(), "Opened image sequence");
        Ok(Self::new(paths, fps))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> FindrResult<Option<Frame>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let image = image::open(path).map_err(|e| {
            FindrError::source(format!("failed to decode frame {}: {e}", path.display()))
        })?;
        self.next += 1;
        Ok(Some(Frame::from_dynamic(image)))
    }

    fn position_secs(&self) -> f64 {
        self.next.saturating_sub(1) as f64 / self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.paths.len() as u64)
    }
}

/// Deterministic generated frames: a bright square sliding across a dark
/// background.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    count: u64,
    produced: u64,
    width: u32,
    height: u32,
    fps: f64,
}

impl SyntheticSource {
    pub fn new(count: u64, width: u32, height: u32, fps: f64) -> Self {
        Self {
            count,
            produced: 0,
            width: width.max(1),
            height: height.max(1),
            fps: if fps > 0.0 { fps } else { DEFAULT_FPS },
        }
    }

    /// Parse `<count>?width=&height=&fps=` (everything after the scheme).
    pub fn parse(spec: &str, default_fps: f64) -> FindrResult<Self> {
        let (count, query) = spec.split_once('?').unwrap_or((spec, ""));
        let count: u64 = count
            .trim_end_matches('/')
            .parse()
            .map_err(|_| FindrError::source(format!("invalid synthetic frame count '{count}'")))?;

        let mut width = 64;
        let mut height = 48;
        let mut fps = default_fps;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let bad = || FindrError::source(format!("invalid synthetic parameter '{pair}'"));
            match key {
                "width" => width = value.parse().map_err(|_| bad())?,
                "height" => height = value.parse().map_err(|_| bad())?,
                "fps" => fps = value.parse().map_err(|_| bad())?,
                _ => return Err(bad()),
            }
        }
        for (name, side) in [("width", width), ("height", height)] {
            if !(1..=MAX_SYNTHETIC_SIDE).contains(&side) {
                return Err(FindrError::source(format!(
                    "synthetic {name} must be in 1..={MAX_SYNTHETIC_SIDE}, got {side}"
                )));
            }
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(FindrError::source(format!("synthetic fps must be positive, got {fps}")));
        }
        Ok(Self::new(count, width, height, fps))
    }

    fn render(&self, index: u64) -> Frame {
        let side = (self.width.min(self.height) / 4).max(1);
        let span = u64::from(self.width.saturating_sub(side).max(1));
        let x0 = ((index * 4) % span) as u32;
        let y0 = (self.height - side) / 2;

        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                Rgb([230, 230, 230])
            } else {
                Rgb([20, 20, 40])
            }
        });
        Frame::new(image)
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> FindrResult<Option<Frame>> {
        if self.produced >= self.count {
            return Ok(None);
        }
        let frame = self.render(self.produced);
        self.produced += 1;
        Ok(Some(frame))
    }

    fn position_secs(&self) -> f64 {
        self.produced.saturating_sub(1) as f64 / self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.count)
    }
}
