//! Static capability manifests.
//!
//! A manifest declares the result keys a capability writes, the keys it
//! reads from earlier stages, and the configuration it accepts. Pipelines
//! are validated against manifests once, before any model is loaded.

use serde::Serialize;
use serde_json::Value;

use findr_common::{FindrError, FindrResult};
use findr_frame_model::{KeyDeclaration, ValueKind};

use crate::config::CapabilityConfig;

/// Keys supplied to every pipeline by the engine rather than by a capability.
pub const EXTERNAL_INPUTS: &[&str] = &["image"];

/// A result key written by a capability.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutputKey {
    pub key: &'static str,
    pub kind: ValueKind,
    pub description: &'static str,
}

impl KeyDeclaration for OutputKey {
    fn key(&self) -> &str {
        self.key
    }

    fn kind(&self) -> ValueKind {
        self.kind
    }
}

/// A key a capability reads from the results of earlier stages.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct InputKey {
    pub key: &'static str,
    pub required: bool,
}

/// JSON type a configuration value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    String,
    StringList,
    Integer,
    Float,
    Bool,
}

impl ConfigType {
    /// Whether `value` is acceptable for this type. Integers are accepted
    /// where floats are expected. Integer settings are sizes and counts, so
    /// they must fit a `u32`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ConfigType::String => value.is_string(),
            ConfigType::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            ConfigType::Integer => value.as_u64().is_some_and(|v| u32::try_from(v).is_ok()),
            ConfigType::Float => value.is_number(),
            ConfigType::Bool => value.is_boolean(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfigType::String => "string",
            ConfigType::StringList => "list of strings",
            ConfigType::Integer => "non-negative integer",
            ConfigType::Float => "number",
            ConfigType::Bool => "boolean",
        }
    }
}

/// A configuration key accepted by a capability.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConfigKey {
    pub key: &'static str,
    #[serde(rename = "type")]
    pub ty: ConfigType,
    pub required: bool,
    pub description: &'static str,
}

/// Declaration of a capability type's data and configuration contract.
#[derive(Debug, Serialize)]
pub struct CapabilityManifest {
    /// Registered tool-type name.
    pub name: &'static str,
    pub description: &'static str,
    pub produces: &'static [OutputKey],
    pub requires: &'static [InputKey],
    pub config_keys: &'static [ConfigKey],
}

impl CapabilityManifest {
    /// Check `config` against the declared config keys.
    ///
    /// Fails on the first missing required key or mistyped value. Keys the
    /// manifest does not declare are ignored with a warning.
    pub fn validate_config(&self, config: &CapabilityConfig) -> FindrResult<()> {
        for decl in self.config_keys {
            match config.get(decl.key) {
                None | Some(Value::Null) if decl.required => {
                    return Err(FindrError::configuration(format!(
                        "capability '{}' is missing required config key '{}'",
                        self.name, decl.key
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !decl.ty.accepts(value) => {
                    return Err(FindrError::configuration(format!(
                        "capability '{}' config key '{}' must be a {}",
                        self.name,
                        decl.key,
                        decl.ty.name()
                    )));
                }
                Some(_) => {}
            }
        }

        for key in config.keys() {
            if !self.config_keys.iter().any(|d| d.key == key) {
                tracing::warn!(capability = self.name, key = %key, "Ignoring unknown config key");
            }
        }
        Ok(())
    }
}
