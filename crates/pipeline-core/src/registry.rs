//! Capability lookup by tool-type name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use findr_common::{FindrError, FindrResult};

use crate::capability::{Capability, CapabilityHandle};
use crate::manifest::CapabilityManifest;
use crate::model::ModelLoader;
use crate::tools::{captioning, detection, pose};

type Factory = Arc<dyn Fn() -> Box<dyn Capability> + Send + Sync>;

struct Entry {
    manifest: &'static CapabilityManifest,
    factory: Factory,
}

/// Table of capability types available to pipelines.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<&'static str, Entry>,
    runtime: Option<String>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in detection, captioning, and pose capabilities,
    /// all backed by `loader`.
    pub fn with_builtins(loader: Arc<dyn ModelLoader>) -> Self {
        let mut registry = Self::new();
        registry.runtime = loader.is_linked().then(|| loader.name().to_string());

        let l = loader.clone();
        registry.register(&detection::MANIFEST, move || {
            Box::new(detection::DetectionCapability::new(l.clone()))
        });
        let l = loader.clone();
        registry.register(&captioning::MANIFEST, move || {
            Box::new(captioning::CaptioningCapability::new(l.clone()))
        });
        registry.register(&pose::MANIFEST, move || {
            Box::new(pose::PoseCapability::new(loader.clone()))
        });
        registry
    }

    /// Register a capability type under its manifest name, replacing any
    /// previous registration.
    pub fn register<F>(&mut self, manifest: &'static CapabilityManifest, factory: F)
    where
        F: Fn() -> Box<dyn Capability> + Send + Sync + 'static,
    {
        tracing::debug!(capability = manifest.name, "Registering capability");
        self.entries.insert(
            manifest.name,
            Entry {
                manifest,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn manifest(&self, name: &str) -> Option<&'static CapabilityManifest> {
        self.entries.get(name).map(|e| e.manifest)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn manifests(&self) -> Vec<&'static CapabilityManifest> {
        self.entries.values().map(|e| e.manifest).collect()
    }

    /// Name of the linked model runtime, if any.
    pub fn runtime(&self) -> Option<&str> {
        self.runtime.as_deref()
    }

    /// Create a fresh, unloaded instance.
    pub fn create(&self, name: &str) -> FindrResult<CapabilityHandle> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| self.unknown(name))?;
        Ok(CapabilityHandle::new((entry.factory)()))
    }

    pub(crate) fn unknown(&self, name: &str) -> FindrError {
        FindrError::configuration(format!(
            "unknown capability type '{}' (available: {})",
            name,
            self.names().join(", ")
        ))
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .field("runtime", &self.runtime)
            .finish()
    }
}
