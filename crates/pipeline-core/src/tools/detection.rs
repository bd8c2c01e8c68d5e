//! Open-vocabulary object detection with tracking ids.

use std::sync::Arc;

use findr_common::FindrResult;
use findr_frame_model::{
    BoundingBox, Detection, Frame, FrameContext, Keypoint, Mask, ResultMap, ResultValue, ValueKind,
};

use super::{not_loaded, setting_f32, setting_string, setting_strings, setting_u32, warm_up};
use crate::capability::Capability;
use crate::config::CapabilityConfig;
use crate::extrapolate::BoxExtrapolator;
use crate::manifest::{CapabilityManifest, ConfigKey, ConfigType, InputKey, OutputKey};
use crate::model::{ModelBackend, ModelLoader, ModelRequest, PreparedFrame};

pub const NAME: &str = "detection";

const WARMUP_RUNS: usize = 16;
const DEFAULT_IMAGE_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;

pub static MANIFEST: CapabilityManifest = CapabilityManifest {
    name: NAME,
    description: "Open-vocabulary object detection and tracking",
    produces: &[
        OutputKey {
            key: "boxes",
            kind: ValueKind::Detections,
            description: "Tracked bounding boxes with class and confidence",
        },
        OutputKey {
            key: "masks",
            kind: ValueKind::Masks,
            description: "Instance segmentation polygons, when the model provides them",
        },
        OutputKey {
            key: "keypoints",
            kind: ValueKind::Keypoints,
            description: "Per-instance keypoints, when the model provides them",
        },
    ],
    requires: &[InputKey {
        key: "image",
        required: true,
    }],
    config_keys: &[
        ConfigKey {
            key: "vocabulary",
            ty: ConfigType::StringList,
            required: true,
            description: "Class names to detect",
        },
        ConfigKey {
            key: "image_size",
            ty: ConfigType::Integer,
            required: false,
            description: "Model input size (default: 640)",
        },
        ConfigKey {
            key: "confidence_threshold",
            ty: ConfigType::Float,
            required: false,
            description: "Minimum detection confidence (default: 0.25)",
        },
        ConfigKey {
            key: "model_id",
            ty: ConfigType::String,
            required: false,
            description: "Model weights identifier",
        },
    ],
};

#[derive(Debug, Clone)]
struct Settings {
    vocabulary: Vec<String>,
    image_size: u32,
    confidence_threshold: f32,
}

/// Detector capability.
pub struct DetectionCapability {
    loader: Arc<dyn ModelLoader>,
    backend: Option<Box<dyn ModelBackend>>,
    settings: Option<Settings>,
    tracker: BoxExtrapolator,
    last_masks: Option<Vec<Mask>>,
    last_keypoints: Option<Vec<Vec<Keypoint>>>,
}

impl DetectionCapability {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            backend: None,
            settings: None,
            tracker: BoxExtrapolator::default(),
            last_masks: None,
            last_keypoints: None,
        }
    }
}

impl Capability for DetectionCapability {
    fn manifest(&self) -> &'static CapabilityManifest {
        &MANIFEST
    }

    fn load(&mut self, config: &CapabilityConfig) -> FindrResult<()> {
        let settings = Settings {
            vocabulary: setting_strings(config, "vocabulary"),
            image_size: setting_u32(config, "image_size", DEFAULT_IMAGE_SIZE),
            confidence_threshold: setting_f32(config, "confidence_threshold", DEFAULT_CONFIDENCE),
        };
        let request = ModelRequest {
            capability: NAME,
            model_id: setting_string(config, "model_id"),
            image_size: settings.image_size,
            settings: config.clone(),
        };

        let mut backend = self.loader.load(&request)?;
        warm_up(backend.as_mut(), settings.image_size, WARMUP_RUNS)?;
        tracing::debug!(
            vocabulary = settings.vocabulary.len(),
            image_size = settings.image_size,
            "Detector warmed up"
        );

        self.backend = Some(backend);
        self.settings = Some(settings);
        Ok(())
    }

    fn unload(&mut self) {
        self.backend = None;
        self.settings = None;
        self.tracker.reset();
        self.last_masks = None;
        self.last_keypoints = None;
    }

    fn process(
        &mut self,
        frame: &Frame,
        _so_far: &ResultMap,
        ctx: &FrameContext,
    ) -> FindrResult<ResultMap> {
        let (Some(backend), Some(settings)) = (self.backend.as_mut(), self.settings.as_ref())
        else {
            return Err(not_loaded(NAME));
        };

        let input = PreparedFrame::fit(frame, settings.image_size);
        let output = backend.infer(&input)?;
        let (w, h) = frame.dimensions();

        let mut boxes = Vec::with_capacity(output.detections.len());
        let mut kept = Vec::with_capacity(output.detections.len());
        for (i, det) in output.detections.into_iter().enumerate() {
            if det.confidence < settings.confidence_threshold {
                continue;
            }
            if !settings.vocabulary.is_empty() && !settings.vocabulary.contains(&det.class_name) {
                continue;
            }
            kept.push(i);
            boxes.push(Detection {
                bbox: to_source(&det.bbox, &input).clamp_to(w, h),
                ..det
            });
        }
        self.tracker.observe(ctx.frame_index, &boxes);

        let mut results = ResultMap::new();
        results.insert("boxes", ResultValue::Detections(boxes));

        self.last_masks = (!output.masks.is_empty()).then(|| {
            output
                .masks
                .iter()
                .enumerate()
                .filter(|(i, _)| kept.contains(i))
                .map(|(_, m)| Mask {
                    track_id: m.track_id,
                    polygon: m
                        .polygon
                        .iter()
                        .map(|[x, y]| [x * input.scale_x, y * input.scale_y])
                        .collect(),
                })
                .collect()
        });
        self.last_keypoints = (!output.keypoints.is_empty()).then(|| {
            output
                .keypoints
                .iter()
                .enumerate()
                .filter(|(i, _)| kept.contains(i))
                .map(|(_, points)| {
                    points
                        .iter()
                        .map(|k| Keypoint {
                            x: k.x * input.scale_x,
                            y: k.y * input.scale_y,
                            confidence: k.confidence,
                        })
                        .collect()
                })
                .collect()
        });

        if let Some(masks) = &self.last_masks {
            results.insert("masks", ResultValue::Masks(masks.clone()));
        }
        if let Some(keypoints) = &self.last_keypoints {
            results.insert("keypoints", ResultValue::Keypoints(keypoints.clone()));
        }
        Ok(results)
    }

    fn extrapolate(&mut self, frame: &Frame, ctx: &FrameContext) -> FindrResult<ResultMap> {
        let (w, h) = frame.dimensions();
        let mut results = ResultMap::new();
        results.insert(
            "boxes",
            ResultValue::Detections(self.tracker.extrapolate(ctx.frame_index, w, h)),
        );
        if let Some(masks) = &self.last_masks {
            results.insert("masks", ResultValue::Masks(masks.clone()));
        }
        if let Some(keypoints) = &self.last_keypoints {
            results.insert("keypoints", ResultValue::Keypoints(keypoints.clone()));
        }
        Ok(results)
    }
}

fn to_source(bbox: &BoundingBox, input: &PreparedFrame) -> BoundingBox {
    bbox.scale(input.scale_x, input.scale_y)
}
