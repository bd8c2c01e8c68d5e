//! Request and response bodies.

use serde::{Deserialize, Serialize};

use findr_pipeline::CapabilityManifest;
use findr_stream_engine::{InitStatus, SessionSnapshot};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_session: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub capabilities: Vec<&'static CapabilityManifest>,
    /// Linked model runtime, if any.
    pub runtime: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub status: InitStatus,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub active: bool,
    pub session: Option<SessionSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub reset: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndResponse {
    pub ended: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_path: String,
}
