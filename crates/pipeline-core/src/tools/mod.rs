//! Built-in capability variants.
//!
//! Each variant does its own preprocessing (fit-resize to the model input)
//! and postprocessing (rescaling to source pixels, confidence filtering),
//! and delegates inference to a backend from the registry's model loader.

pub mod captioning;
pub mod detection;
pub mod pose;

use findr_common::{FindrError, FindrResult};

use crate::config::CapabilityConfig;
use crate::model::{ModelBackend, PreparedFrame};

pub(crate) fn setting_u32(config: &CapabilityConfig, key: &str, default: u32) -> u32 {
    config
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

pub(crate) fn setting_f32(config: &CapabilityConfig, key: &str, default: f32) -> f32 {
    config
        .get(key)
        .and_then(|v| v.as_f64())
        .map(|v| v as f32)
        .unwrap_or(default)
}

pub(crate) fn setting_string(config: &CapabilityConfig, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub(crate) fn setting_strings(config: &CapabilityConfig, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Run `runs` warm-up inferences on a blank input.
pub(crate) fn warm_up(
    backend: &mut dyn ModelBackend,
    image_size: u32,
    runs: usize,
) -> FindrResult<()> {
    let blank = PreparedFrame::blank(image_size);
    for _ in 0..runs {
        backend.warmup(&blank)?;
    }
    Ok(())
}

pub(crate) fn not_loaded(capability: &str) -> FindrError {
    FindrError::illegal_state(capability, "unloaded", "process")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted model backends for capability tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use findr_common::FindrResult;

    use crate::model::{ModelBackend, ModelLoader, ModelOutput, ModelRequest, PreparedFrame};

    #[derive(Debug, Default)]
    pub struct ScriptCalls {
        pub warmups: AtomicUsize,
        pub infers: AtomicUsize,
        pub requests: Mutex<Vec<ModelRequest>>,
    }

    /// Loader whose backends return clones of `outputs`, one per inference,
    /// repeating the last.
    pub struct ScriptedLoader {
        pub outputs: Vec<ModelOutput>,
        pub calls: Arc<ScriptCalls>,
    }

    impl ScriptedLoader {
        pub fn new(outputs: Vec<ModelOutput>) -> Self {
            Self {
                outputs,
                calls: Arc::new(ScriptCalls::default()),
            }
        }
    }

    struct ScriptedBackend {
        outputs: Vec<ModelOutput>,
        next: usize,
        calls: Arc<ScriptCalls>,
    }

    impl ModelBackend for ScriptedBackend {
        fn infer(&mut self, _input: &PreparedFrame) -> FindrResult<ModelOutput> {
            self.calls.infers.fetch_add(1, Ordering::SeqCst);
            let idx = self.next.min(self.outputs.len().saturating_sub(1));
            self.next += 1;
            Ok(self.outputs.get(idx).cloned().unwrap_or_default())
        }

        fn warmup(&mut self, _input: &PreparedFrame) -> FindrResult<()> {
            self.calls.warmups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl ModelLoader for ScriptedLoader {
        fn name(&self) -> &str {
            "scripted"
        }

        fn load(&self, request: &ModelRequest) -> FindrResult<Box<dyn ModelBackend>> {
            if let Ok(mut requests) = self.calls.requests.lock() {
                requests.push(request.clone());
            }
            Ok(Box::new(ScriptedBackend {
                outputs: self.outputs.clone(),
                next: 0,
                calls: self.calls.clone(),
            }))
        }
    }
}
