//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP/WebSocket server settings.
    pub server: ServerConfig,

    /// Sampling applied when a pipeline configuration does not choose one.
    pub sampling: SamplingDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Directory where uploaded videos are cached.
    pub upload_dir: PathBuf,
}

/// Server and stream output parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,

    /// TCP port.
    pub port: u16,

    /// JPEG quality for the frame stream (1-100).
    pub jpeg_quality: u8,

    /// Encoded frames buffered between the engine and the HTTP response.
    pub frame_buffer: usize,

    /// Structured payloads buffered per WebSocket subscriber before drops.
    pub subscriber_buffer: usize,

    /// Allowed CORS origins. Empty means permissive.
    pub allowed_origins: Vec<String>,
}

/// Default sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingDefaults {
    /// Run full inference every `stride` frames.
    pub stride: u32,

    /// Scene-change threshold; when set it replaces the stride.
    pub scene_threshold: Option<f32>,

    /// Upper bound on back-to-back extrapolated frames.
    pub max_consecutive_extrapolations: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "findr=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sampling: SamplingDefaults::default(),
            logging: LoggingConfig::default(),
            upload_dir: default_upload_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            jpeg_quality: 70,
            frame_buffer: 4,
            subscriber_buffer: 32,
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            stride: 3,
            scene_threshold: None,
            max_consecutive_extrapolations: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl ServerConfig {
    /// `bind:port` socket address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("findr").join("config.json")
}

/// Default upload cache directory.
fn default_upload_dir() -> PathBuf {
    let base = std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".cache")
        });
    base.join("findr").join("uploads")
}
