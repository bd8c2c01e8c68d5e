//! Model runtime seam.
//!
//! Capabilities own their preprocessing and postprocessing; the actual
//! inference runs in a [`ModelBackend`] obtained from an injected
//! [`ModelLoader`]. Backends report coordinates in model-input pixels.

use image::imageops::{self, FilterType};
use image::RgbImage;

use findr_common::{FindrError, FindrResult};
use findr_frame_model::{Detection, Frame, Keypoint, Mask, Pose};

use crate::config::CapabilityConfig;

/// What a capability asks the loader for.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Capability type name.
    pub capability: &'static str,
    pub model_id: Option<String>,
    /// Square input edge in pixels.
    pub image_size: u32,
    /// The capability's full settings, for loader-specific keys.
    pub settings: CapabilityConfig,
}

/// A frame resized for model input.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub image: RgbImage,
    /// Source pixels per model-input pixel, horizontally.
    pub scale_x: f32,
    /// Source pixels per model-input pixel, vertically.
    pub scale_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl PreparedFrame {
    /// Fit `frame` inside `image_size` x `image_size`, preserving aspect ratio.
    pub fn fit(frame: &Frame, image_size: u32) -> Self {
        let (w, h) = frame.dimensions();
        let edge = image_size.max(1);
        let ratio = (edge as f32 / w.max(1) as f32).min(edge as f32 / h.max(1) as f32);
        let tw = ((w as f32 * ratio).round() as u32).max(1);
        let th = ((h as f32 * ratio).round() as u32).max(1);

        let image = if (tw, th) == (w, h) {
            frame.image().clone()
        } else {
            imageops::resize(frame.image(), tw, th, FilterType::Triangle)
        };
        Self {
            image,
            scale_x: w as f32 / tw as f32,
            scale_y: h as f32 / th as f32,
            source_width: w,
            source_height: h,
        }
    }

    /// A black square input used for warm-up runs.
    pub fn blank(image_size: u32) -> Self {
        let edge = image_size.max(1);
        Self {
            image: RgbImage::new(edge, edge),
            scale_x: 1.0,
            scale_y: 1.0,
            source_width: edge,
            source_height: edge,
        }
    }
}

/// Raw model output in model-input coordinates.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    pub detections: Vec<Detection>,
    pub masks: Vec<Mask>,
    pub keypoints: Vec<Vec<Keypoint>>,
    pub poses: Vec<Pose>,
    pub text: Option<String>,
}

/// A loaded model.
pub trait ModelBackend: Send {
    fn infer(&mut self, input: &PreparedFrame) -> FindrResult<ModelOutput>;

    /// One warm-up inference. Defaults to a discarded `infer`.
    fn warmup(&mut self, input: &PreparedFrame) -> FindrResult<()> {
        self.infer(input).map(|_| ())
    }
}

/// Provides model backends to capabilities.
pub trait ModelLoader: Send + Sync {
    /// Short name for status output.
    fn name(&self) -> &str;

    /// Whether this loader can produce backends at all.
    fn is_linked(&self) -> bool {
        true
    }

    fn load(&self, request: &ModelRequest) -> FindrResult<Box<dyn ModelBackend>>;
}

/// Loader used when no model runtime is linked into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlinkedModelLoader;

impl ModelLoader for UnlinkedModelLoader {
    fn name(&self) -> &str {
        "unlinked"
    }

    fn is_linked(&self) -> bool {
        false
    }

    fn load(&self, request: &ModelRequest) -> FindrResult<Box<dyn ModelBackend>> {
        Err(FindrError::configuration(format!(
            "no model runtime is linked for capability '{}' (model: {})",
            request.capability,
            request.model_id.as_deref().unwrap_or("default")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_preserves_aspect() {
        let frame = Frame::solid(1280, 720, [0, 0, 0]);
        let prepared = PreparedFrame::fit(&frame, 640);
        assert_eq!(prepared.image.dimensions(), (640, 360));
        assert!((prepared.scale_x - 2.0).abs() < 1e-6);
        assert!((prepared.scale_y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_fit_upscales_small_frames() {
        let frame = Frame::solid(32, 64, [0, 0, 0]);
        let prepared = PreparedFrame::fit(&frame, 128);
        assert_eq!(prepared.image.dimensions(), (64, 128));
        assert!((prepared.scale_x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_unlinked_loader_is_configuration_error() {
        let request = ModelRequest {
            capability: "detection",
            model_id: None,
            image_size: 640,
            settings: CapabilityConfig::new(),
        };
        let err = UnlinkedModelLoader.load(&request).err().unwrap();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("detection"));
    }
}
