//! Multi-person pose estimation.

use std::sync::Arc;

use findr_common::FindrResult;
use findr_frame_model::{Frame, FrameContext, Keypoint, Pose, ResultMap, ResultValue, ValueKind};

use super::{not_loaded, setting_f32, setting_string, setting_u32, warm_up};
use crate::capability::Capability;
use crate::config::CapabilityConfig;
use crate::manifest::{CapabilityManifest, ConfigKey, ConfigType, OutputKey};
use crate::model::{ModelBackend, ModelLoader, ModelRequest, PreparedFrame};

pub const NAME: &str = "pose_estimation";

const WARMUP_RUNS: usize = 1;
const DEFAULT_IMAGE_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.5;

pub static MANIFEST: CapabilityManifest = CapabilityManifest {
    name: NAME,
    description: "Per-person body keypoints",
    produces: &[OutputKey {
        key: "poses",
        kind: ValueKind::Poses,
        description: "Detected poses with keypoints and bounding boxes",
    }],
    requires: &[],
    config_keys: &[
        ConfigKey {
            key: "image_size",
            ty: ConfigType::Integer,
            required: false,
            description: "Image size for model input (default: 640)",
        },
        ConfigKey {
            key: "confidence_threshold",
            ty: ConfigType::Float,
            required: false,
            description: "Confidence threshold for detections (default: 0.5)",
        },
        ConfigKey {
            key: "model_id",
            ty: ConfigType::String,
            required: false,
            description: "Pose model identifier",
        },
    ],
};

/// Pose estimator capability.
pub struct PoseCapability {
    loader: Arc<dyn ModelLoader>,
    backend: Option<Box<dyn ModelBackend>>,
    image_size: u32,
    confidence_threshold: f32,
    last_poses: Vec<Pose>,
}

impl PoseCapability {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            backend: None,
            image_size: DEFAULT_IMAGE_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE,
            last_poses: Vec::new(),
        }
    }
}

/// Mean keypoint confidence; 0 for a pose without keypoints.
fn pose_confidence(pose: &Pose) -> f32 {
    if pose.keypoints.is_empty() {
        return 0.0;
    }
    pose.keypoints.iter().map(|k| k.confidence).sum::<f32>() / pose.keypoints.len() as f32
}

impl Capability for PoseCapability {
    fn manifest(&self) -> &'static CapabilityManifest {
        &MANIFEST
    }

    fn load(&mut self, config: &CapabilityConfig) -> FindrResult<()> {
        self.image_size = setting_u32(config, "image_size", DEFAULT_IMAGE_SIZE);
        self.confidence_threshold = setting_f32(config, "confidence_threshold", DEFAULT_CONFIDENCE);
        let request = ModelRequest {
            capability: NAME,
            model_id: setting_string(config, "model_id"),
            image_size: self.image_size,
            settings: config.clone(),
        };

        let mut backend = self.loader.load(&request)?;
        warm_up(backend.as_mut(), self.image_size, WARMUP_RUNS)?;
        self.backend = Some(backend);
        Ok(())
    }

    fn unload(&mut self) {
        self.backend = None;
        self.last_poses.clear();
    }

    fn process(
        &mut self,
        frame: &Frame,
        _so_far: &ResultMap,
        _ctx: &FrameContext,
    ) -> FindrResult<ResultMap> {
        let backend = self.backend.as_mut().ok_or_else(|| not_loaded(NAME))?;
        let input = PreparedFrame::fit(frame, self.image_size);
        let output = backend.infer(&input)?;
        let (w, h) = frame.dimensions();

        let poses: Vec<Pose> = output
            .poses
            .into_iter()
            .filter(|p| pose_confidence(p) >= self.confidence_threshold)
            .enumerate()
            .map(|(id, p)| Pose {
                id: id as u32,
                keypoints: p
                    .keypoints
                    .iter()
                    .map(|k| Keypoint {
                        x: k.x * input.scale_x,
                        y: k.y * input.scale_y,
                        confidence: k.confidence,
                    })
                    .collect(),
                bbox: p.bbox.scale(input.scale_x, input.scale_y).clamp_to(w, h),
            })
            .collect();

        self.last_poses = poses.clone();
        let mut results = ResultMap::new();
        results.insert("poses", ResultValue::Poses(poses));
        Ok(results)
    }

    fn extrapolate(&mut self, _frame: &Frame, _ctx: &FrameContext) -> FindrResult<ResultMap> {
        let mut results = ResultMap::new();
        results.insert("poses", ResultValue::Poses(self.last_poses.clone()));
        Ok(results)
    }
}
