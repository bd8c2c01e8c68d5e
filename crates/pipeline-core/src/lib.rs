//! Findr Pipeline
//!
//! Turns a declarative pipeline configuration into a validated chain of
//! analysis capabilities and decides, per frame, whether that chain runs
//! its models or extrapolates from recent results:
//! - **Manifests:** what each capability produces, requires, and accepts as config
//! - **Capability lifecycle:** `unloaded -> loading -> ready -> released`
//! - **Pipeline:** construction-time validation, per-frame run and extrapolate
//! - **Scheduler:** fixed-stride or scene-change sampling
//!
//! This crate is pure computation. Model runtimes are reached only through
//! the [`model::ModelLoader`] seam.

pub mod capability;
pub mod config;
pub mod extrapolate;
pub mod histogram;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod tools;

pub use capability::{Capability, CapabilityHandle, LifecycleState};
pub use config::{CapabilityConfig, PipelineConfig, SamplingConfig};
pub use manifest::{CapabilityManifest, ConfigKey, ConfigType, InputKey, OutputKey};
pub use model::{ModelBackend, ModelLoader, UnlinkedModelLoader};
pub use pipeline::Pipeline;
pub use registry::CapabilityRegistry;
pub use scheduler::{SamplerState, SamplingMode, SamplingPolicy, Scheduler};
