//! Linear capability chains.
//!
//! A [`Pipeline`] is built in two phases: every capability type, config key,
//! and required input is checked against the manifests first, and only then
//! are models loaded. If any load fails, the capabilities already loaded are
//! released before the error is returned, so a partially loaded pipeline is
//! never handed out.

use std::collections::HashSet;

use findr_common::{FindrError, FindrResult};
use findr_frame_model::{Frame, FrameContext, ResultMap, SchemaError};

use crate::capability::{CapabilityHandle, LifecycleState};
use crate::config::PipelineConfig;
use crate::manifest::{CapabilityManifest, EXTERNAL_INPUTS};
use crate::registry::CapabilityRegistry;

/// A loaded, ordered chain of capabilities owned by one session.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<CapabilityHandle>,
    torn_down: bool,
}

impl Pipeline {
    /// Check `config` against the registry without loading anything.
    ///
    /// Returns the manifests in chain order.
    pub fn validate(
        registry: &CapabilityRegistry,
        config: &PipelineConfig,
    ) -> FindrResult<Vec<&'static CapabilityManifest>> {
        if config.tool_types.is_empty() {
            return Err(FindrError::configuration(
                "pipeline must name at least one capability",
            ));
        }

        let mut available: HashSet<&str> = EXTERNAL_INPUTS.iter().copied().collect();
        let mut manifests = Vec::with_capacity(config.tool_types.len());

        for name in &config.tool_types {
            let manifest = registry
                .manifest(name)
                .ok_or_else(|| registry.unknown(name))?;
            manifest.validate_config(&config.settings_for(name))?;

            for input in manifest.requires.iter().filter(|i| i.required) {
                if !available.contains(input.key) {
                    return Err(FindrError::configuration(format!(
                        "capability '{}' requires '{}', which no earlier capability produces",
                        manifest.name, input.key
                    )));
                }
            }
            for output in manifest.produces {
                if !available.insert(output.key) {
                    return Err(FindrError::configuration(format!(
                        "capability '{}' produces '{}', which is already provided earlier in the pipeline",
                        manifest.name, output.key
                    )));
                }
            }
            manifests.push(manifest);
        }

        for name in config.tool_settings.keys() {
            if !config.tool_types.contains(name) {
                tracing::warn!(capability = %name, "Settings supplied for a capability not in the pipeline");
            }
        }
        Ok(manifests)
    }

    /// Validate `config`, then create and load every capability in order.
    pub fn build(registry: &CapabilityRegistry, config: &PipelineConfig) -> FindrResult<Self> {
        Self::validate(registry, config)?;

        let mut pipeline = Self {
            stages: Vec::with_capacity(config.tool_types.len()),
            torn_down: false,
        };
        for name in &config.tool_types {
            let mut handle = registry.create(name)?;
            if let Err(e) = handle.load(&config.settings_for(name)) {
                tracing::warn!(capability = %name, error = %e, "Pipeline construction aborted");
                pipeline.teardown();
                return Err(e);
            }
            pipeline.stages.push(handle);
        }

        tracing::info!(capabilities = ?config.tool_types, "Pipeline ready");
        Ok(pipeline)
    }

    /// Capability names in chain order.
    pub fn capability_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(CapabilityHandle::name).collect()
    }

    pub fn states(&self) -> Vec<(&'static str, LifecycleState)> {
        self.stages.iter().map(|s| (s.name(), s.state())).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Run every capability's model on `frame` in chain order.
    ///
    /// The frame itself is never modified. Any capability error is returned
    /// as-is and ends the frame.
    pub fn run(&mut self, frame: &Frame, ctx: &FrameContext) -> FindrResult<ResultMap> {
        self.ensure_live("run")?;
        let mut results = ResultMap::new();
        for stage in &mut self.stages {
            let partial = stage.process(frame, &results, ctx)?;
            fold(&mut results, partial, stage.manifest())?;
        }
        Ok(results)
    }

    /// Produce approximate results for `frame` without running any model.
    pub fn extrapolate(&mut self, frame: &Frame, ctx: &FrameContext) -> FindrResult<ResultMap> {
        self.ensure_live("extrapolate")?;
        let mut results = ResultMap::new();
        for stage in &mut self.stages {
            let partial = stage.extrapolate(frame, ctx)?;
            fold(&mut results, partial, stage.manifest())?;
        }
        Ok(results)
    }

    /// Unload every capability in chain order. Calling this again is a no-op.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for stage in &mut self.stages {
            stage.unload();
        }
        tracing::debug!(capabilities = self.stages.len(), "Pipeline torn down");
    }

    fn ensure_live(&self, operation: &str) -> FindrResult<()> {
        if self.torn_down {
            Err(FindrError::illegal_state("pipeline", "torn down", operation))
        } else {
            Ok(())
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn fold(
    results: &mut ResultMap,
    partial: ResultMap,
    manifest: &'static CapabilityManifest,
) -> FindrResult<()> {
    results
        .merge_declared(partial, manifest.produces)
        .map_err(|e| match e {
            SchemaError::UndeclaredKey { key } => FindrError::UndeclaredOutput {
                capability: manifest.name.to_string(),
                key,
            },
            other => FindrError::inference(manifest.name, other.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use findr_frame_model::{ResultValue, ValueKind};
    use serde_json::json;

    use crate::capability::tests::{label, Calls, Counter, COUNTER_MANIFEST};
    use crate::capability::Capability;
    use crate::config::CapabilityConfig;
    use crate::manifest::{InputKey, OutputKey};

    static NEEDS_BOXES: CapabilityManifest = CapabilityManifest {
        name: "needs_boxes",
        description: "reads boxes",
        produces: &[OutputKey {
            key: "summary",
            kind: ValueKind::Json,
            description: "box summary",
        }],
        requires: &[InputKey {
            key: "boxes",
            required: true,
        }],
        config_keys: &[],
    };

    static ROGUE: CapabilityManifest = CapabilityManifest {
        name: "rogue",
        description: "writes keys it never declared",
        produces: &[],
        requires: &[],
        config_keys: &[],
    };

    struct Rogue;

    impl Capability for Rogue {
        fn manifest(&self) -> &'static CapabilityManifest {
            &ROGUE
        }
        fn load(&mut self, _config: &CapabilityConfig) -> FindrResult<()> {
            Ok(())
        }
        fn unload(&mut self) {}
        fn process(
            &mut self,
            _frame: &Frame,
            _so_far: &ResultMap,
            _ctx: &FrameContext,
        ) -> FindrResult<ResultMap> {
            let mut out = ResultMap::new();
            out.insert("secret", ResultValue::Json(json!(1)));
            Ok(out)
        }
        fn extrapolate(&mut self, _frame: &Frame, _ctx: &FrameContext) -> FindrResult<ResultMap> {
            Ok(ResultMap::new())
        }
    }

    struct Reader;

    impl Capability for Reader {
        fn manifest(&self) -> &'static CapabilityManifest {
            &NEEDS_BOXES
        }
        fn load(&mut self, _config: &CapabilityConfig) -> FindrResult<()> {
            Ok(())
        }
        fn unload(&mut self) {}
        fn process(
            &mut self,
            _frame: &Frame,
            _so_far: &ResultMap,
            _ctx: &FrameContext,
        ) -> FindrResult<ResultMap> {
            Ok(ResultMap::new())
        }
        fn extrapolate(&mut self, _frame: &Frame, _ctx: &FrameContext) -> FindrResult<ResultMap> {
            Ok(ResultMap::new())
        }
    }

    fn registry(calls: &Arc<Calls>, fail_load: bool) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        let c = calls.clone();
        registry.register(&COUNTER_MANIFEST, move || {
            Box::new(Counter::new(c.clone())) as Box<dyn Capability>
        });
        let c = calls.clone();
        registry.register(&ROGUE, || Box::new(Rogue) as Box<dyn Capability>);
        registry.register(&NEEDS_BOXES, || Box::new(Reader) as Box<dyn Capability>);
        if fail_load {
            static FAILING: CapabilityManifest = CapabilityManifest {
                name: "failing",
                description: "never loads",
                produces: &[],
                requires: &[],
                config_keys: &[],
            };
            registry.register(&FAILING, move || {
                let mut stub = Counter::new(c.clone());
                stub.fail_load = true;
                Box::new(Relabel(stub, &FAILING)) as Box<dyn Capability>
            });
        }
        registry
    }

    /// Wraps a stub under a different manifest.
    struct Relabel(Counter, &'static CapabilityManifest);

    impl Capability for Relabel {
        fn manifest(&self) -> &'static CapabilityManifest {
            self.1
        }
        fn load(&mut self, config: &CapabilityConfig) -> FindrResult<()> {
            self.0.load(config)
        }
        fn unload(&mut self) {
            self.0.unload()
        }
        fn process(
            &mut self,
            frame: &Frame,
            so_far: &ResultMap,
            ctx: &FrameContext,
        ) -> FindrResult<ResultMap> {
            self.0.process(frame, so_far, ctx)
        }
        fn extrapolate(&mut self, frame: &Frame, ctx: &FrameContext) -> FindrResult<ResultMap> {
            self.0.extrapolate(frame, ctx)
        }
    }

    fn counter_config() -> PipelineConfig {
        PipelineConfig::with_tools(["counter"]).with_settings("counter", label())
    }

    #[test]
    fn test_run_and_extrapolate() {
        let calls = Arc::new(Calls::default());
        let mut pipeline = Pipeline::build(&registry(&calls, false), &counter_config()).unwrap();
        let frame = Frame::solid(4, 4, [0, 0, 0]);

        let full = pipeline.run(&frame, &FrameContext::new(0, 1.0, 0.0)).unwrap();
        assert_eq!(
            full.get("caption"),
            Some(&ResultValue::Caption("full 0".to_string()))
        );

        let approx = pipeline
            .extrapolate(&frame, &FrameContext::new(1, 0.0, 0.0))
            .unwrap();
        assert_eq!(
            approx.get("caption"),
            Some(&ResultValue::Caption("extrapolated 1".to_string()))
        );
    }

    #[test]
    fn test_extrapolation_never_calls_process() {
        let calls = Arc::new(Calls::default());
        let mut pipeline = Pipeline::build(&registry(&calls, false), &counter_config()).unwrap();
        let frame = Frame::solid(4, 4, [0, 0, 0]);

        for i in 0..20 {
            pipeline
                .extrapolate(&frame, &FrameContext::new(i, 0.0, 0.0))
                .unwrap();
        }
        assert_eq!(calls.process.load(Ordering::SeqCst), 0);
        assert_eq!(calls.extrapolate.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_missing_required_config_loads_nothing() {
        let calls = Arc::new(Calls::default());
        let config = PipelineConfig::with_tools(["counter"]);
        let err = Pipeline::build(&registry(&calls, false), &config).unwrap_err();

        assert!(matches!(err, FindrError::Configuration { .. }));
        assert!(err.to_string().contains("'label'"));
        assert_eq!(calls.loads.load(Ordering::SeqCst), 0);
        assert_eq!(calls.unloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_later_config_error_loads_nothing() {
        let calls = Arc::new(Calls::default());
        let config = PipelineConfig::with_tools(["counter", "unknown"])
            .with_settings("counter", label());
        let err = Pipeline::build(&registry(&calls, false), &config).unwrap_err();
        assert!(err.to_string().contains("'unknown'"));
        assert_eq!(calls.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_failure_releases_earlier_stages() {
        let calls = Arc::new(Calls::default());
        let config = PipelineConfig::with_tools(["counter", "failing"])
            .with_settings("counter", label());
        assert!(Pipeline::build(&registry(&calls, true), &config).is_err());

        // The counter loaded and was released; the failing stub loaded once
        // and released its partial state once.
        assert_eq!(calls.loads.load(Ordering::SeqCst), 2);
        assert_eq!(calls.unloads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_requires_must_be_produced_earlier() {
        let calls = Arc::new(Calls::default());
        let err = Pipeline::validate(
            &registry(&calls, false),
            &PipelineConfig::with_tools(["needs_boxes"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires 'boxes'"));
    }

    #[test]
    fn test_duplicate_outputs_rejected() {
        let calls = Arc::new(Calls::default());
        let config = PipelineConfig::with_tools(["counter", "counter"])
            .with_settings("counter", label());
        let err = Pipeline::validate(&registry(&calls, false), &config).unwrap_err();
        assert!(err.to_string().contains("already provided"));
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let calls = Arc::new(Calls::default());
        assert!(Pipeline::validate(&registry(&calls, false), &PipelineConfig::default()).is_err());
    }

    #[test]
    fn test_undeclared_output_is_rejected() {
        let calls = Arc::new(Calls::default());
        let mut pipeline =
            Pipeline::build(&registry(&calls, false), &PipelineConfig::with_tools(["rogue"]))
                .unwrap();
        let err = pipeline
            .run(&Frame::solid(1, 1, [0, 0, 0]), &FrameContext::new(0, 1.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, FindrError::UndeclaredOutput { ref key, .. } if key == "secret"));
    }

    #[test]
    fn test_teardown_twice_is_safe() {
        let calls = Arc::new(Calls::default());
        let mut pipeline = Pipeline::build(&registry(&calls, false), &counter_config()).unwrap();
        assert_eq!(pipeline.states(), vec![("counter", LifecycleState::Ready)]);
        assert!(!pipeline.is_torn_down());

        pipeline.teardown();
        pipeline.teardown();
        assert!(pipeline.is_torn_down());
        assert_eq!(pipeline.states(), vec![("counter", LifecycleState::Released)]);
        drop(pipeline);

        assert_eq!(calls.unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_after_teardown_is_illegal() {
        let calls = Arc::new(Calls::default());
        let mut pipeline = Pipeline::build(&registry(&calls, false), &counter_config()).unwrap();
        pipeline.teardown();
        let err = pipeline
            .run(&Frame::solid(1, 1, [0, 0, 0]), &FrameContext::new(0, 1.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, FindrError::IllegalState { .. }));
    }

    #[test]
    fn test_config_from_json_validates() {
        let calls = Arc::new(Calls::default());
        let config: PipelineConfig = serde_json::from_value(json!({
            "tool_types": ["counter"],
            "tool_settings": { "counter": { "label": 3 } }
        }))
        .unwrap();
        let err = Pipeline::validate(&registry(&calls, false), &config).unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }
}
