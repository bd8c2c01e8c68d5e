//! Pipeline configuration as submitted by clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use findr_common::config::SamplingDefaults;
use findr_common::{FindrError, FindrResult};

use crate::scheduler::{SamplingMode, SamplingPolicy};

/// Settings for a single capability, keyed by config key.
pub type CapabilityConfig = serde_json::Map<String, serde_json::Value>;

/// Declarative description of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capability type names in chain order.
    #[serde(default)]
    pub tool_types: Vec<String>,

    /// Per-capability settings keyed by capability type name.
    #[serde(default)]
    pub tool_settings: BTreeMap<String, CapabilityConfig>,

    /// Frame sampling. Server defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingConfig>,
}

impl PipelineConfig {
    /// A pipeline of the given capability types with no settings.
    pub fn with_tools<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool_types: tools.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add settings for one capability type.
    pub fn with_settings(mut self, tool: impl Into<String>, settings: CapabilityConfig) -> Self {
        self.tool_settings.insert(tool.into(), settings);
        self
    }

    /// Settings for `tool`, empty when none were supplied.
    pub fn settings_for(&self, tool: &str) -> CapabilityConfig {
        self.tool_settings.get(tool).cloned().unwrap_or_default()
    }

    /// Resolve the sampling policy, falling back to `defaults`.
    pub fn sampling_policy(&self, defaults: &SamplingDefaults) -> FindrResult<SamplingPolicy> {
        match &self.sampling {
            Some(sampling) => sampling.to_policy(defaults.max_consecutive_extrapolations),
            None => {
                let mode = match defaults.scene_threshold {
                    Some(threshold) => SamplingMode::SceneChange { threshold },
                    None => SamplingMode::FixedStride {
                        stride: defaults.stride,
                    },
                };
                SamplingPolicy::new(mode, defaults.max_consecutive_extrapolations)
            }
        }
    }
}

/// Sampling selection. Exactly one of `stride` or `scene_threshold` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_threshold: Option<f32>,

    /// Cap on back-to-back extrapolated frames; 0 disables the cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_extrapolations: Option<u32>,
}

impl SamplingConfig {
    pub fn stride(stride: u32) -> Self {
        Self {
            stride: Some(stride),
            ..Self::default()
        }
    }

    pub fn scene_threshold(threshold: f32) -> Self {
        Self {
            scene_threshold: Some(threshold),
            ..Self::default()
        }
    }

    pub fn to_policy(&self, default_cap: u32) -> FindrResult<SamplingPolicy> {
        let mode = match (self.stride, self.scene_threshold) {
            (Some(stride), None) => SamplingMode::FixedStride { stride },
            (None, Some(threshold)) => SamplingMode::SceneChange { threshold },
            (Some(_), Some(_)) => {
                return Err(FindrError::configuration(
                    "sampling must set either 'stride' or 'scene_threshold', not both",
                ))
            }
            (None, None) => {
                return Err(FindrError::configuration(
                    "sampling must set one of 'stride' or 'scene_threshold'",
                ))
            }
        };
        SamplingPolicy::new(
            mode,
            self.max_consecutive_extrapolations.unwrap_or(default_cap),
        )
    }
}
