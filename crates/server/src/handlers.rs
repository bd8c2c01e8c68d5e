//! JSON endpoint handlers.

use std::path::Path as FsPath;

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;

use findr_common::FindrError;
use findr_stream_engine::{SessionId, SessionRequest};

use crate::error::ApiError;
use crate::types::{
    CapabilitiesResponse, EndResponse, HealthResponse, InitResponse, ResetResponse,
    SessionCreated, SessionStatus, UploadResponse,
};
use crate::AppState;

/// Multipart field carrying the uploaded media.
const UPLOAD_FIELD: &str = "video";

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_session: state.manager.admission().current().map(|id| id.to_string()),
    })
}

pub async fn list_capabilities(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.manager.registry();
    Json(CapabilitiesResponse {
        capabilities: registry.manifests(),
        runtime: registry.runtime().map(str::to_string),
    })
}

pub async fn init_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.manager.admit(request)?;
    Ok(Json(SessionCreated {
        session_id: id.to_string(),
    }))
}

/// Load the session's models. Runs on the blocking pool; may take a while.
pub async fn initialize_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::parse(&id)?;
    let manager = state.manager.clone();
    let status = tokio::task::spawn_blocking(move || manager.initialize_pipeline(id))
        .await
        .map_err(|e| FindrError::Other(e.into()))??;
    Ok(Json(InitResponse {
        status,
        session_id: id.to_string(),
    }))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::parse(&id)?;
    state.manager.end(id)?;
    Ok(Json(EndResponse {
        ended: id.to_string(),
    }))
}

pub async fn reset_session(State(state): State<AppState>) -> impl IntoResponse {
    let reset = state.manager.reset().map(|id| id.to_string());
    Json(ResetResponse { reset })
}

pub async fn session_status(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.manager.snapshot();
    Json(SessionStatus {
        active: state.manager.admission().is_active(),
        session,
    })
}

/// Store an uploaded file under the upload directory and return its path.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FindrError::configuration(format!("invalid upload: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = upload_name(field.file_name());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| FindrError::configuration(format!("invalid upload: {e}")))?;

        tokio::fs::create_dir_all(&state.upload_dir).await?;
        let path = state.upload_dir.join(name);
        tokio::fs::write(&path, &bytes).await?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "File uploaded");
        return Ok(Json(UploadResponse {
            file_path: path.display().to_string(),
        }));
    }
    Err(FindrError::configuration(format!("missing multipart field '{UPLOAD_FIELD}'")).into())
}

/// Stored file name: a fresh prefix plus the client's base name, never a
/// path.
fn upload_name(client_name: Option<&str>) -> String {
    let base = client_name
        .and_then(|n| FsPath::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.bin");
    format!("{}_{base}", uuid::Uuid::new_v4().simple())
}
