//! Validate a pipeline configuration file.

use std::path::PathBuf;

use findr_common::config::AppConfig;
use findr_pipeline::{Pipeline, PipelineConfig};

use super::builtin_registry;

pub fn run(path: PathBuf, config: &AppConfig) -> anyhow::Result<()> {
    println!("Validating pipeline at: {}", path.display());

    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let pipeline = parse(&content)?;

    let registry = builtin_registry();
    let manifests = Pipeline::validate(&registry, &pipeline)
        .map_err(|e| anyhow::anyhow!("Invalid pipeline: {e}"))?;
    let policy = pipeline
        .sampling_policy(&config.sampling)
        .map_err(|e| anyhow::anyhow!("Invalid sampling: {e}"))?;

    println!("  Capabilities: {}", manifests.len());
    for (position, manifest) in manifests.iter().enumerate() {
        let keys: Vec<&str> = manifest.produces.iter().map(|o| o.key).collect();
        println!("    {}. {} -> {}", position + 1, manifest.name, keys.join(", "));
    }
    println!("  Sampling: {:?}", policy.mode);
    println!(
        "  Max consecutive extrapolations: {}",
        policy.max_consecutive_extrapolations
    );
    println!("\nPipeline is valid.");
    Ok(())
}

/// Accepts a bare pipeline configuration or a session request wrapping one.
fn parse(content: &str) -> anyhow::Result<PipelineConfig> {
    let mut value: serde_json::Value = serde_json::from_str(content)?;
    if let Some(inner) = value.get_mut("pipeline_configuration") {
        value = inner.take();
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_request_shape() {
        let config = parse(
            r#"{"video_url": "clip", "pipeline_configuration": {"tool_types": ["captioning"]}}"#,
        )
        .unwrap();
        assert_eq!(config.tool_types, vec!["captioning"]);
    }

    #[test]
    fn test_parse_bare_shape() {
        let config = parse(r#"{"tool_types": ["detection"], "sampling": {"stride": 4}}"#).unwrap();
        assert_eq!(config.tool_types, vec!["detection"]);
        assert_eq!(config.sampling.unwrap().stride, Some(4));
    }
}
