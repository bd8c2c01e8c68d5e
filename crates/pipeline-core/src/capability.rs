//! The capability contract and its lifecycle guard.
//!
//! Implementations provide the analysis; [`CapabilityHandle`] owns an
//! implementation and enforces the lifecycle:
//!
//! ```text
//! Unloaded --load--> Loading --ok--> Ready --unload--> Released
//!                       \--err--> Failed
//! ```
//!
//! `process` and `extrapolate` are only permitted while `Ready`. `unload` is
//! accepted in every state and only releases resources once.

use std::fmt;

use serde::Serialize;

use findr_common::{FindrError, FindrResult};
use findr_frame_model::{Frame, FrameContext, ResultMap};

use crate::config::CapabilityConfig;
use crate::manifest::CapabilityManifest;

/// A pluggable frame-analysis unit.
pub trait Capability: Send {
    fn manifest(&self) -> &'static CapabilityManifest;

    /// Acquire model resources and warm them up. Config has already been
    /// validated against the manifest.
    fn load(&mut self, config: &CapabilityConfig) -> FindrResult<()>;

    /// Release model resources. Must tolerate being called after a failed
    /// or partial load.
    fn unload(&mut self);

    /// Run the model on `frame`. `so_far` holds results of earlier stages.
    fn process(
        &mut self,
        frame: &Frame,
        so_far: &ResultMap,
        ctx: &FrameContext,
    ) -> FindrResult<ResultMap>;

    /// Cheap approximation of `process` from recent results. Must not run
    /// the model.
    fn extrapolate(&mut self, frame: &Frame, ctx: &FrameContext) -> FindrResult<ResultMap>;
}

/// Lifecycle state of a capability instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Ready,
    /// Load failed; the instance is discarded.
    Failed,
    /// Unloaded after use; the instance cannot be reloaded.
    Released,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Owns one capability instance and enforces its lifecycle.
pub struct CapabilityHandle {
    inner: Box<dyn Capability>,
    state: LifecycleState,
}

impl CapabilityHandle {
    pub fn new(inner: Box<dyn Capability>) -> Self {
        Self {
            inner,
            state: LifecycleState::Unloaded,
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.manifest().name
    }

    pub fn manifest(&self) -> &'static CapabilityManifest {
        self.inner.manifest()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Validate `config`, then load and warm up the capability.
    ///
    /// A missing or mistyped config key fails before the instance leaves
    /// `Unloaded`. A failing load moves it to `Failed`.
    pub fn load(&mut self, config: &CapabilityConfig) -> FindrResult<()> {
        if self.state != LifecycleState::Unloaded {
            return Err(FindrError::illegal_state(self.name(), self.state, "load"));
        }
        self.manifest().validate_config(config)?;

        self.state = LifecycleState::Loading;
        tracing::debug!(capability = self.name(), "Loading capability");
        match self.inner.load(config) {
            Ok(()) => {
                self.state = LifecycleState::Ready;
                tracing::info!(capability = self.name(), "Capability ready");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(capability = self.name(), error = %e, "Capability failed to load");
                self.inner.unload();
                self.state = LifecycleState::Failed;
                Err(e)
            }
        }
    }

    /// Release resources. Safe in any state; only the first call after a
    /// successful or in-progress load reaches the implementation.
    pub fn unload(&mut self) {
        match self.state {
            LifecycleState::Ready | LifecycleState::Loading => {
                self.inner.unload();
                self.state = LifecycleState::Released;
                tracing::debug!(capability = self.name(), "Capability released");
            }
            LifecycleState::Unloaded => self.state = LifecycleState::Released,
            LifecycleState::Failed | LifecycleState::Released => {}
        }
    }

    pub fn process(
        &mut self,
        frame: &Frame,
        so_far: &ResultMap,
        ctx: &FrameContext,
    ) -> FindrResult<ResultMap> {
        self.ensure_ready("process")?;
        self.inner
            .process(frame, so_far, ctx)
            .map_err(|e| into_inference(self.name(), e))
    }

    pub fn extrapolate(&mut self, frame: &Frame, ctx: &FrameContext) -> FindrResult<ResultMap> {
        self.ensure_ready("extrapolate")?;
        self.inner
            .extrapolate(frame, ctx)
            .map_err(|e| into_inference(self.name(), e))
    }

    fn ensure_ready(&self, operation: &str) -> FindrResult<()> {
        if self.state == LifecycleState::Ready {
            Ok(())
        } else {
            Err(FindrError::illegal_state(self.name(), self.state, operation))
        }
    }
}

impl Drop for CapabilityHandle {
    fn drop(&mut self) {
        self.unload();
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("name", &self.name())
            .field("state", &self.state)
            .finish()
    }
}

fn into_inference(capability: &str, err: FindrError) -> FindrError {
    match err {
        FindrError::Inference { .. } | FindrError::IllegalState { .. } => err,
        other => FindrError::inference(capability, other.to_string()),
    }
}
