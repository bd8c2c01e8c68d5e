pub mod check;
pub mod sample;
pub mod serve;
pub mod validate;

use std::sync::Arc;

use findr_pipeline::{CapabilityRegistry, UnlinkedModelLoader};

/// The registry the server would use.
pub fn builtin_registry() -> CapabilityRegistry {
    CapabilityRegistry::with_builtins(Arc::new(UnlinkedModelLoader))
}
