//! Whole-frame captioning.

use std::sync::Arc;

use findr_common::{FindrError, FindrResult};
use findr_frame_model::{Frame, FrameContext, ResultMap, ResultValue, ValueKind};

use super::{not_loaded, setting_string, warm_up};
use crate::capability::Capability;
use crate::config::CapabilityConfig;
use crate::manifest::{CapabilityManifest, ConfigKey, ConfigType, OutputKey};
use crate::model::{ModelBackend, ModelLoader, ModelRequest, PreparedFrame};

pub const NAME: &str = "captioning";

const IMAGE_SIZE: u32 = 384;
const WARMUP_RUNS: usize = 1;
const DEFAULT_PROMPT: &str = "Describe this image in one sentence.";

pub static MANIFEST: CapabilityManifest = CapabilityManifest {
    name: NAME,
    description: "Natural-language caption of the whole frame",
    produces: &[OutputKey {
        key: "caption",
        kind: ValueKind::Caption,
        description: "Caption text",
    }],
    requires: &[],
    config_keys: &[
        ConfigKey {
            key: "model_id",
            ty: ConfigType::String,
            required: false,
            description: "Vision-language model identifier",
        },
        ConfigKey {
            key: "prompt",
            ty: ConfigType::String,
            required: false,
            description: "Instruction sent with the image",
        },
    ],
};

/// Captioner capability.
pub struct CaptioningCapability {
    loader: Arc<dyn ModelLoader>,
    backend: Option<Box<dyn ModelBackend>>,
    last_caption: Option<String>,
}

impl CaptioningCapability {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            backend: None,
            last_caption: None,
        }
    }
}

/// Strip chat-template echo: keep only the text after the last
/// `Assistant:` marker, trimmed.
pub fn clean_caption(raw: &str) -> String {
    raw.rsplit_once("Assistant:")
        .map_or(raw, |(_, answer)| answer)
        .trim()
        .to_string()
}

impl Capability for CaptioningCapability {
    fn manifest(&self) -> &'static CapabilityManifest {
        &MANIFEST
    }

    fn load(&mut self, config: &CapabilityConfig) -> FindrResult<()> {
        let mut settings = config.clone();
        settings
            .entry("prompt")
            .or_insert_with(|| DEFAULT_PROMPT.into());
        let request = ModelRequest {
            capability: NAME,
            model_id: setting_string(config, "model_id"),
            image_size: IMAGE_SIZE,
            settings,
        };

        let mut backend = self.loader.load(&request)?;
        warm_up(backend.as_mut(), IMAGE_SIZE, WARMUP_RUNS)?;
        self.backend = Some(backend);
        Ok(())
    }

    fn unload(&mut self) {
        self.backend = None;
        self.last_caption = None;
    }

    fn process(
        &mut self,
        frame: &Frame,
        _so_far: &ResultMap,
        _ctx: &FrameContext,
    ) -> FindrResult<ResultMap> {
        let backend = self.backend.as_mut().ok_or_else(|| not_loaded(NAME))?;
        let output = backend.infer(&PreparedFrame::fit(frame, IMAGE_SIZE))?;
        let raw = output
            .text
            .ok_or_else(|| FindrError::inference(NAME, "model returned no text"))?;

        let caption = clean_caption(&raw);
        self.last_caption = Some(caption.clone());

        let mut results = ResultMap::new();
        results.insert("caption", ResultValue::Caption(caption));
        Ok(results)
    }

    fn extrapolate(&mut self, _frame: &Frame, _ctx: &FrameContext) -> FindrResult<ResultMap> {
        let mut results = ResultMap::new();
        if let Some(caption) = &self.last_caption {
            results.insert("caption", ResultValue::Caption(caption.clone()));
        }
        Ok(results)
    }
}
